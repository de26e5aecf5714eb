//! Compile a layout script and dump what it parses out of a data file.
//!
//! Usage:
//!   binblock [OPTIONS] SCRIPT [DATA]
//!
//! DATA defaults to stdin.
//!
//! Options:
//!   --msb0          Read bits most significant first (default: --lsb0)
//!   --skip-eof      Stop filling structures at end of data instead of failing
//!   --limit N       Fail if a whole-stream array would exceed N items
//!   --disasm        Print the compiled bytecode instead of parsing
//!
//! Set RUST_LOG (e.g. RUST_LOG=binblock=debug) for diagnostics on stderr.

use anyhow::{bail, Context};
use binblock::dump::struct_to_dump;
use binblock::{ArrayLimit, BitOrder, ParserBuilder, ParserFlags};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    if let Some(pos) = args.iter().position(|a| names.contains(&a.as_str())) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn take_value(args: &mut Vec<String>, name: &str) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == name) {
        Some(pos) if pos + 1 < args.len() => {
            let value = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(value))
        }
        Some(_) => bail!("{} needs a value", name),
        None => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let msb0 = take_flag(&mut args, &["--msb0"]);
    take_flag(&mut args, &["--lsb0"]);
    let skip_eof = take_flag(&mut args, &["--skip-eof"]);
    let disasm = take_flag(&mut args, &["--disasm"]);
    let limit = take_value(&mut args, "--limit")?
        .map(|v| v.parse::<usize>().with_context(|| format!("bad --limit '{}'", v)))
        .transpose()?;

    let (script_path, data_path) = match args.as_slice() {
        [script] => (script.clone(), None),
        [script, data] => (script.clone(), Some(data.clone())),
        _ => bail!("usage: binblock [--lsb0|--msb0] [--skip-eof] [--limit N] [--disasm] SCRIPT [DATA]"),
    };

    let script = std::fs::read_to_string(&script_path).with_context(|| format!("reading {}", script_path))?;
    let mut builder = ParserBuilder::new().bit_order(if msb0 { BitOrder::Msb0 } else { BitOrder::Lsb0 });
    if skip_eof {
        builder = builder.flags(ParserFlags::SKIP_REMAINING_FIELDS_IF_EOF);
    }
    if let Some(n) = limit {
        builder = builder.array_limit(ArrayLimit::Fail(n));
    }
    let parser = builder.build(&script).with_context(|| format!("compiling {}", script_path))?;

    if disasm {
        print!("{}", parser.block().disassemble());
        return Ok(());
    }

    let data = match &data_path {
        Some(path) => std::fs::read(path).with_context(|| format!("reading {}", path))?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let root = parser.parse_bytes(&data).context("parsing data")?;
    println!("{}", struct_to_dump(&root));
    eprintln!("{} byte(s) consumed", parser.final_stream_byte_counter());
    Ok(())
}
