use sagascript::disassembler::Disassembler;
use sagascript::segment::{DirectoryResources, ExportTable, ScriptResources};
use std::env;
use std::path::Path;

/// Instructions shown per entry point when no offset is given.
const DEFAULT_COUNT: usize = 40;

fn parse_offset(text: &str) -> Result<usize, std::num::ParseIntError> {
    match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <image_dir> <segment> [offset] [count]", args[0]);
        return Ok(());
    }

    let segment: u16 = args[2].parse()?;
    let offset = args.get(3).map(|o| parse_offset(o)).transpose()?;
    let count = args.get(4).map(|c| c.parse::<usize>()).transpose()?;

    let mut resources = DirectoryResources::open(Path::new(&args[1]))?;
    let code = resources
        .load_segment(segment)
        .ok_or_else(|| format!("Segment {segment} not found"))?;

    // without an offset, disassemble every exported entry point in the segment
    let starts: Vec<usize> = match offset {
        Some(offset) => vec![offset],
        None => {
            let exports = ExportTable::new(
                resources
                    .load_export_table()
                    .ok_or("Export table not found")?,
            );
            (1..exports.count() as u16)
                .filter_map(|entry| exports.lookup(entry).ok())
                .filter(|(s, _)| *s == segment)
                .map(|(_, o)| o as usize)
                .collect()
        }
    };
    let count = count.or(if offset.is_some() { None } else { Some(DEFAULT_COUNT) });

    println!("Segment {} ({} bytes)", segment, code.len());
    println!("----------------------------------------");
    let disasm = Disassembler::new(&code);
    for start in starts {
        match disasm.disassemble(start, count) {
            Ok(output) => println!("{}", output),
            Err(e) => eprintln!("Error disassembling at {start:#06x}: {}", e),
        }
    }
    Ok(())
}
