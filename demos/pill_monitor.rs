// Acquisition monitor
//
// Connects to an instrument, applies one configuration and prints a summary
// of every capture it reads.

use clap::Parser;
use pillscope_rs::{
    AcquisitionConfig, Acquisition, BitDepth, ChannelMask, LinkSettings, LogicAnalyzerConfig,
    Mode, PillScope, ScopeConfig, Trigger, TriggerEdge, TriggerMode, VoltmeterConfig,
};
use std::io::{self, Write};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pill_monitor")]
#[command(version = "0.1")]
#[command(about = "Read captures from a BluePill oscilloscope, logic analyzer or voltmeter")]
struct Args {
    /// Serial port; the first responding USB device when omitted
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long, default_value = "SCOPE", help = "SCOPE, LA or VM")]
    mode: Mode,

    #[arg(short, long, default_value_t = 12, help = "Scope bit depth, 8 or 12")]
    bits: u8,

    #[arg(short, long, default_value = "TFFF", help = "Enabled channels as four T/F characters")]
    channels: ChannelMask,

    #[arg(long, default_value_t = 500, help = "Samples per channel")]
    memory: u32,

    #[arg(short, long, default_value_t = 1000, help = "Sample rate in Hz")]
    rate: u32,

    #[arg(long, default_value_t = 1)]
    trigger_channel: u8,

    #[arg(long, default_value_t = 50, help = "Trigger level in percent of full scale")]
    trigger_level: u8,

    #[arg(long, default_value = "R", help = "R(ising) or F(alling)")]
    trigger_edge: TriggerEdge,

    #[arg(long, default_value = "A", help = "A(uto), N(ormal), S(ingle) or D(isabled)")]
    trigger_mode: TriggerMode,

    #[arg(long, default_value_t = 50)]
    pretrigger: u8,

    #[arg(long, default_value_t = 1, help = "Voltmeter averaging count")]
    averaging: u32,

    /// Stop after this many captures
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

impl Args {
    fn acquisition_config(&self) -> Result<AcquisitionConfig, Box<dyn std::error::Error>> {
        let trigger = Trigger {
            channel: self.trigger_channel,
            level_percent: self.trigger_level,
            edge: self.trigger_edge,
            mode: self.trigger_mode,
            pretrigger_percent: self.pretrigger,
        };

        Ok(match self.mode {
            Mode::Scope => ScopeConfig {
                bits: BitDepth::try_from(self.bits)?,
                channels: self.channels,
                memory_depth: self.memory,
                sample_rate: self.rate,
                trigger,
            }
            .into(),
            Mode::LogicAnalyzer => LogicAnalyzerConfig {
                memory_depth: self.memory,
                sample_rate: self.rate,
                trigger,
            }
            .into(),
            Mode::VoltMeter => VoltmeterConfig {
                channels: self.channels,
                averaging: self.averaging,
                show_vcc: true,
            }
            .into(),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut scope = PillScope::connect(args.port.as_deref(), LinkSettings::default())?;
    println!("Connected to {}", scope.identity());

    let limits = scope.limits();
    let config = args.acquisition_config()?;
    println!(
        "Limits: max {} samples/channel, max {} Hz",
        limits.max_memory_depth(config.mode(), config.bit_depth(), config.channels()),
        limits.max_sample_rate(config.mode(), config.channels())
    );

    scope.configure(config)?;
    println!("Configured {} mode, reading {} captures\n", scope.mode(), args.count);

    let mut captured = 0;
    while captured < args.count {
        match scope.read() {
            Ok(Some(acquisition)) => {
                captured += 1;
                print_summary(captured, &acquisition);
                if acquisition.config().needs_rearm() {
                    scope.rearm()?;
                }
            }
            Ok(None) => {
                print!(".");
                io::stdout().flush()?;
            }
            Err(e) => {
                eprintln!("\nError reading data: {}", e);
                eprintln!("Retrying in 100ms...");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    if scope.mode() != Mode::VoltMeter {
        println!("\nDevice settings: {:?}", scope.query_settings()?);
    }

    Ok(())
}

fn print_summary(index: usize, acquisition: &Acquisition) {
    let channels = acquisition.channels();
    print!(
        "[{:3}] {} bytes, {} samples/channel, {:?} since last |",
        index,
        acquisition.raw_len(),
        channels.samples_per_channel(),
        acquisition.elapsed()
    );

    for ch in 0..4 {
        if let Some(samples) = channels.analog(ch) {
            let (min, max) = samples
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            print!(" ch{}: {:.3}..{:.3}V", ch + 1, min, max);
        } else if let Some(levels) = channels.digital(ch) {
            let high = levels.iter().filter(|&&level| level).count();
            print!(" ch{}: {}/{} high", ch + 1, high, levels.len());
        }
    }
    if let Some(vcc) = channels.vcc().and_then(<[f64]>::last) {
        print!(" vcc: {:.3}V", vcc);
    }
    println!();
}
