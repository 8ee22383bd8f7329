use gatenet::cost;
use gatenet::prelude::*;
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("xor");
    let result = match cmd {
        "--help" | "-h" | "help" => {
            print_help();
            return;
        }
        "xor" => run_xor(),
        "parity" => run_parity(),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("gatenet (gated recurrent network engine)");
    println!("usage:");
    println!("  cargo run              (same as xor)");
    println!("  cargo run -- xor       train a 2-3-1 graph on XOR");
    println!("  cargo run -- parity    compare compiled and interpreted runs");
    println!("  cargo run -- --help");
}

fn feed_forward(seed: u64, sizes: [usize; 3]) -> Result<Graph> {
    let mut c = Circuit::new(CircuitConfig::default().with_seed(seed));
    let input = c.add_ensemble(sizes[0]);
    let hidden = c.add_ensemble(sizes[1]);
    let output = c.add_ensemble(sizes[2]);
    c.project_ensemble(input, hidden, None, None)?;
    c.project_ensemble(hidden, output, None, None)?;
    Graph::new(c, Layers::new(input, vec![hidden], output))
}

fn run_xor() -> Result<()> {
    let set = [
        ([0.0, 0.0], [0.0]),
        ([0.0, 1.0], [1.0]),
        ([1.0, 0.0], [1.0]),
        ([1.0, 1.0], [0.0]),
    ];
    let mut graph = feed_forward(2024, [2, 3, 1])?;
    let rate = 0.3;

    for epoch in 1..=20_000 {
        let mut error = 0.0;
        for (x, t) in &set {
            let y = graph.activate(x)?;
            graph.propagate(rate, t)?;
            error += cost::mse(t, &y)?;
        }
        error /= set.len() as f64;
        if epoch % 2000 == 0 {
            println!("epoch={epoch:6} mse={error:.6}");
        }
        if error < 0.005 {
            println!("converged at epoch {epoch} (mse={error:.6})");
            break;
        }
    }

    for (x, t) in &set {
        let y = graph.activate(x)?;
        println!("{x:?} -> {:.4} (target {})", y[0], t[0]);
    }
    info!(
        slots = graph.program().map(|p| p.memory().len()).unwrap_or(0),
        "xor finished"
    );
    Ok(())
}

/// Gated recurrent graph: a memory ensemble whose self links, inputs and
/// outputs are all gated by a second hidden ensemble.
fn gated_graph(seed: u64) -> Result<Graph> {
    let mut c = Circuit::new(CircuitConfig::default().with_seed(seed));
    let input = c.add_ensemble(3);
    let memory = c.add_ensemble(4);
    let gates = c.add_ensemble(4);
    let output = c.add_ensemble(2);
    c.configure_ensemble(memory, EnsembleOptions::default().transfer(Transfer::Tanh));

    let feed = c.project_ensemble(input, memory, None, None)?;
    let recur = c.project_ensemble(memory, memory, None, None)?;
    c.project_ensemble(input, gates, None, None)?;
    c.project_ensemble(memory, gates, None, None)?;
    let out = c.project_ensemble(memory, output, None, None)?;

    c.gate_ensemble(gates, recur, GateKind::OneToOne)?;
    c.gate_ensemble(gates, feed, GateKind::Input)?;
    c.gate_ensemble(gates, out, GateKind::Output)?;
    Graph::new(c, Layers::new(input, vec![memory, gates], output))
}

fn run_parity() -> Result<()> {
    let mut interpreted = gated_graph(99)?;
    let mut compiled = gated_graph(99)?;
    interpreted.set_optimize(false);

    let mut max_diff = 0.0_f64;
    let mut x = [0.0; 3];
    for step in 0..500 {
        for (i, v) in x.iter_mut().enumerate() {
            *v = ((step * (i + 1)) % 7) as f64 / 7.0;
        }
        let target = [x[0] * x[1], 1.0 - x[2]];

        let a = interpreted.activate(&x)?;
        let b = compiled.activate(&x)?;
        for (p, q) in a.iter().zip(&b) {
            max_diff = max_diff.max((p - q).abs());
        }
        interpreted.propagate(0.1, &target)?;
        compiled.propagate(0.1, &target)?;
    }

    let slots = compiled.program().map(|p| p.memory().len()).unwrap_or(0);
    let instructions = compiled.program().map(|p| p.instruction_count()).unwrap_or(0);
    println!("steps=500 slots={slots} instructions={instructions} max_diff={max_diff:e}");
    Ok(())
}
