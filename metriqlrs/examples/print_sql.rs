use std::{env, fs, path::PathBuf};

use metriql::{DialectKind, MetriqlConfig, QueryRequest, SemanticGraph};
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("Usage: print_sql <models_dir> <request_json> [dialect]");
    eprintln!("Example: cargo run --example print_sql -- examples/models examples/requests/fees_by_country.json postgres");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let models_dir = PathBuf::from(args.remove(0));
    let request_path = PathBuf::from(args.remove(0));

    let config = MetriqlConfig::load_default();
    let dialect = match args.first() {
        Some(name) => name.parse::<DialectKind>()?,
        None => config.render.dialect,
    };

    let graph = SemanticGraph::load_from_dir(models_dir)?;
    let request_str = fs::read_to_string(request_path)?;
    let request: QueryRequest = serde_json::from_str(&request_str)?;

    let compiled = config
        .render
        .builder()
        .compile(&graph, &request, dialect.dialect())?;
    println!("{}", compiled.sql);
    for column in &compiled.columns {
        eprintln!("{}: {:?}", column.name, column.kind);
    }
    Ok(())
}
