use log::{debug, info};
use sagascript::host::{BuiltinType, CallTable, NativeCall, ScriptHost};
use sagascript::segment::DirectoryResources;
use sagascript::zrand::ScriptRand;
use sagascript::{Interpreter, ScriptCallFrame, ScriptConfig, VmResult};
use std::env;
use std::path::Path;

/// Host with no game behind it: no builtin objects, no natives, and a
/// clock that advances one tick per dispatcher pass.
struct ConsoleHost {
    time: u32,
}

impl ScriptHost for ConsoleHost {
    fn game_time(&self) -> u32 {
        self.time
    }

    fn frame_count(&self) -> u32 {
        self.time
    }

    fn builtin_data(&mut self, _kind: BuiltinType, _index: u16) -> Option<&mut [u8]> {
        None
    }

    fn builtin_script_class(&self, _kind: BuiltinType, _index: u16) -> u16 {
        0
    }

    fn native_count(&self, _table: CallTable) -> usize {
        0
    }

    fn call_native(
        &mut self,
        _table: CallTable,
        _func: u16,
        _call: &mut NativeCall<'_>,
    ) -> VmResult<i16> {
        Ok(0)
    }

    fn tag_is_exclusive(&self, _tag: u16) -> bool {
        false
    }

    fn set_tag_exclusive(&mut self, _tag: u16, _exclusive: bool) {}

    fn status_message(&mut self, message: &str) {
        println!("{message}");
    }
}

fn usage(program: &str) {
    println!("sagascript - SAGA script interpreter");
    println!();
    println!(
        "Usage: {} <image_dir> <export> [--ticks N] [--config file] [--seed N]",
        program
    );
    println!();
    println!("<image_dir> holds data.bin, exports.bin and seg_<n>.bin files.");
    println!("The export is run to completion or until it waits; waiting threads");
    println!("are then dispatched for up to --ticks passes (default 100).");
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {flag}: {value}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
        return Ok(());
    }

    let image = Path::new(&args[1]);
    let export: u16 = args[2]
        .parse()
        .map_err(|_| format!("Invalid export number: {}", args[2]))?;

    let mut ticks: u32 = 100;
    let mut config = ScriptConfig::default();
    let mut seed: Option<u64> = None;

    let mut rest = args[3..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--ticks" => ticks = parse_number(flag, rest.next())?,
            "--seed" => seed = Some(parse_number(flag, rest.next())?),
            "--config" => {
                let path = rest.next().ok_or("--config needs a file")?;
                config = ScriptConfig::from_file(Path::new(path))?;
            }
            other => return Err(format!("Unknown option {other}").into()),
        }
    }
    debug!("Config: {:?}", config);

    let resources = DirectoryResources::open(image)?;
    let mut vm = Interpreter::new(Box::new(resources), config)?;
    if let Some(seed) = seed {
        info!("Using predictable random seed {}", seed);
        vm = vm.with_rand(ScriptRand::new_predictable(seed));
    }

    let mut host = ConsoleHost { time: 0 };
    let mut frame = ScriptCallFrame::default();
    let result = vm.run_script(&mut host, export, &mut frame)?;
    println!("Export {export}: {result:?}, returned {}", frame.return_value);

    for tick in 0..ticks {
        if vm.threads().is_empty() {
            break;
        }
        host.time += 1;
        vm.dispatch(&mut host)?;
        debug!("Tick {}: {} threads", tick, vm.threads().len());
    }
    if !vm.threads().is_empty() {
        println!("{} threads still waiting", vm.threads().len());
    }
    Ok(())
}
