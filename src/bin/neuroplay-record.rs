use anyhow::{Context, Result};
use neuroplay::{DeviceModel, Scanner};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Searches for a NeuroPlay headset over BLE, streams EEG from it, and records the session to an EDF+ file. Electrode contact is validated before recording unless --no-validate is given."
)]
struct Opt {
    #[structopt(
        short,
        long,
        default_value = "NeuroPlay-6C",
        help = "Device model to search for (NeuroPlay-6C or NeuroPlay-8Cap)"
    )]
    model: DeviceModel,

    #[structopt(short, long, help = "Unit id from the advertised name")]
    id: u32,

    #[structopt(
        short,
        long,
        default_value = "10",
        help = "Recording duration in seconds"
    )]
    duration: u64,

    #[structopt(
        short = "-t",
        long = "--scan-timeout",
        default_value = "5",
        help = "Per-discovery scan timeout in seconds"
    )]
    scan_timeout: u64,

    #[structopt(long, help = "Skip the electrode contact check")]
    no_validate: bool,

    #[structopt(name = "FILE", parse(from_os_str), help = "Output EDF+ path")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let device = Scanner::search_for(
        opt.model,
        opt.id,
        Some(Duration::from_secs(opt.scan_timeout)),
    )
    .await?
    .with_context(|| format!("no {} ({}) in range", opt.model, opt.id))?;

    device.connect().await?;

    // Let the stream settle before judging contact quality.
    tokio::time::sleep(Duration::from_secs(2)).await;

    if !opt.no_validate {
        let mut statuses: Vec<_> = device.validate_channels().await?.into_iter().collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        for (channel, status) in statuses {
            println!("{:<8} {:?}", channel, status);
        }
    }

    device
        .recorder()
        .start_recording(&opt.output)
        .context("failed to start recording")?;

    tokio::time::sleep(Duration::from_secs(opt.duration)).await;

    device
        .recorder()
        .stop_recording()
        .context("failed to finalize recording")?;

    device.disconnect().await?;
    println!("wrote {}", opt.output.display());

    Ok(())
}
