//! File-oriented tool for graph snapshots.
//!
//! Examples:
//!   gatenet-cli inspect net.json
//!   gatenet-cli eval net.json 1,0
//!   gatenet-cli image net.json net.gnm
//!
//! Snapshots are the JSON documents written by `Graph::to_json`.

use std::fs;
use std::io::{BufWriter, Write};
use std::process;

use gatenet::observer::GraphAdapter;
use gatenet::prelude::{CircuitConfig, Graph};

fn usage() -> ! {
    eprintln!("gatenet-cli (reads graph snapshots written by Graph::to_json)");
    eprintln!("Usage: gatenet-cli [--seed N] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  inspect <snapshot.json>              Show layers, groups and counts");
    eprintln!("  eval <snapshot.json> <x1,x2,...>     Activate once and print outputs");
    eprintln!("  image <snapshot.json> <out.gnm>      Compile and write the memory image");
    process::exit(1);
}

fn parse_args() -> (CircuitConfig, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut cfg = CircuitConfig::default();
    if args.len() >= 2 && args[0] == "--seed" {
        match args[1].parse::<u64>() {
            Ok(seed) => cfg = cfg.with_seed(seed),
            Err(_) => usage(),
        }
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (cfg, args)
}

fn load(path: &str, cfg: CircuitConfig) -> Result<Graph, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("read {path}: {e}"))?;
    Graph::from_json(&json, cfg).map_err(|e| format!("parse {path}: {e}"))
}

fn parse_vector(s: &str) -> Result<Vec<f64>, String> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("bad value {part:?}: {e}"))
        })
        .collect()
}

fn inspect(graph: &Graph) {
    let view = GraphAdapter::new(graph).snapshot();
    let d = view.diagnostics;
    println!(
        "units={} links={} gated_links={} inputs={} outputs={}",
        d.units,
        d.links,
        d.gated_links,
        graph.inputs(),
        graph.outputs()
    );
    for e in &view.ensembles {
        println!(
            "ensemble {:>3} {:<10} size={:<4} self_connected={}",
            e.id,
            format!("{:?}", e.layer),
            e.size,
            e.self_connected
        );
        for p in &e.connected_to {
            println!(
                "    group {:>3} -> ensemble {:<3} {:?} links={} gated_by={:?}",
                p.group,
                p.target,
                p.topology,
                p.size,
                p.gated_from.iter().map(|g| g.gater).collect::<Vec<_>>()
            );
        }
    }
}

fn run(cfg: CircuitConfig, args: &[String]) -> Result<(), String> {
    match args[0].as_str() {
        "inspect" => {
            let path = args.get(1).ok_or("inspect needs a snapshot path")?;
            inspect(&load(path, cfg)?);
        }
        "eval" => {
            let (Some(path), Some(values)) = (args.get(1), args.get(2)) else {
                return Err("eval needs a snapshot path and an input vector".into());
            };
            let mut graph = load(path, cfg)?;
            let x = parse_vector(values)?;
            let y = graph.activate(&x).map_err(|e| e.to_string())?;
            let text: Vec<String> = y.iter().map(|v| format!("{v:.6}")).collect();
            println!("{}", text.join(","));
        }
        "image" => {
            let (Some(path), Some(out)) = (args.get(1), args.get(2)) else {
                return Err("image needs a snapshot path and an output path".into());
            };
            let mut graph = load(path, cfg)?;
            graph.compile();
            let program = graph.program().ok_or("compilation produced no program")?;
            let file = fs::File::create(out).map_err(|e| format!("create {out}: {e}"))?;
            let mut w = BufWriter::new(file);
            program
                .save_memory_to(&mut w)
                .and_then(|_| w.flush())
                .map_err(|e| format!("write {out}: {e}"))?;
            println!(
                "wrote {out}: slots={} instructions={}",
                program.memory().len(),
                program.instruction_count()
            );
        }
        other => return Err(format!("unknown command: {other}")),
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let (cfg, args) = parse_args();
    if let Err(msg) = run(cfg, &args) {
        eprintln!("{msg}");
        process::exit(1);
    }
}
