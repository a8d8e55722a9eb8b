use clap::Parser;
use margin_context::chunk::{ChunkOptions, chunk};
use margin_context::extract::{content_hash, preview, strip_markup};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// Chunk a text file into JSON the way the search engine chunks entity text.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum window size in tokens (about four characters each).
    #[arg(short, long, default_value_t = 256)]
    max_tokens: usize,

    /// Tokens shared between consecutive chunks.
    #[arg(short, long, default_value_t = 32)]
    overlap_tokens: usize,

    /// Chunks shorter than this many characters are dropped.
    #[arg(long, default_value_t = 50)]
    min_chunk_size: usize,

    /// Strip HTML and markdown before chunking.
    #[arg(long)]
    strip: bool,
}

#[derive(Serialize)]
struct SerializableChunk<'a> {
    chunk_index: usize,
    content_hash: String,
    preview: String,
    text: &'a str,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let text = if args.strip {
        strip_markup(&file_content)
    } else {
        file_content
    };

    let options = ChunkOptions::new(args.max_tokens, args.overlap_tokens, args.min_chunk_size);
    let chunks = chunk(&text, &options);

    let serializable_chunks: Vec<SerializableChunk> = chunks
        .iter()
        .enumerate()
        .map(|(chunk_index, text)| SerializableChunk {
            chunk_index,
            content_hash: content_hash(text),
            preview: preview(text),
            text,
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{}", json_output);

    Ok(())
}
