use clap::Parser;
use codie_context::{ChunkerRegistry, DEFAULT_MAX_CHUNK_SIZE};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

/// Chunk one source file and print the chunks as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// File path used to pick a splitter when reading from stdin.
    #[arg(short, long, default_value = "stdin.txt")]
    path: PathBuf,

    /// Maximum size in bytes for each paragraph chunk.
    #[arg(short, long, default_value_t = DEFAULT_MAX_CHUNK_SIZE)]
    max_chunk_size: usize,

    /// Skip syntax-aware splitting.
    #[arg(long)]
    paragraph_only: bool,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let (path, content) = match args.input {
        Some(input) => {
            let content = fs::read_to_string(&input)?;
            (input, content)
        }
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            (args.path, buffer)
        }
    };

    let registry = if args.paragraph_only {
        ChunkerRegistry::paragraph_only()
    } else {
        ChunkerRegistry::with_default_grammars()
    };

    let chunks = registry.chunk_file(&path, &content, args.max_chunk_size);
    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{}", json_output);

    Ok(())
}
