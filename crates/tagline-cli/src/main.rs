mod progress;
mod serve;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use argh::FromArgs;
use tagline::model::{ModelLoader, ReloadPolicy};
use tagline::system::SystemStatus;
use tagline::{BatchProcessor, CaptionConfig, LoadOptions};
use tagline_vlm::PaligemmaLoader;

use crate::progress::ProgressObserver;
use crate::serve::AppState;

#[derive(FromArgs, Debug)]
/// Caption every image of a folder with a local vision-language model
struct Args {
    /// load the model with 4-bit quantization when the backend supports it
    #[argh(switch)]
    quantize: bool,

    /// run on the CPU even if an accelerator is available
    #[argh(switch)]
    cpu: bool,

    /// port of the web UI
    #[argh(option, default = "9527")]
    port: u16,

    /// caption this folder and exit instead of serving the web UI
    #[argh(option, short = 'f')]
    folder: Option<PathBuf>,

    /// model checkpoint directory
    #[argh(option)]
    model_dir: Option<PathBuf>,

    /// JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// print the batch report as JSON
    #[argh(switch)]
    json: bool,

    /// what to do when the loaded model has other options: reuse, reload or reject
    #[argh(option)]
    reload_policy: Option<ReloadPolicy>,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => CaptionConfig::from_file(path)?,
        None => CaptionConfig::default(),
    };
    if let Some(dir) = &args.model_dir {
        config.model.dir = dir.clone();
    }
    if let Some(policy) = args.reload_policy {
        config.model.reload_policy = policy;
    }

    let options = LoadOptions::new(args.quantize, args.cpu);
    let processor = BatchProcessor::from_config(PaligemmaLoader, &config);

    let accelerator = tagline_vlm::device::available_accelerator();
    let system = SystemStatus::probe(
        processor.handle().status(),
        options,
        accelerator,
        &config.resources,
    );
    if args.json {
        eprintln!("{system}");
    } else {
        println!("{system}");
    }

    match &args.folder {
        Some(folder) => run_folder(processor, folder, options, args.json),
        None => {
            let state =
                AppState::new(processor, config.resources).with_device(options, accelerator);
            let state = Arc::new(state);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve::serve(state, args.port))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_folder<L: ModelLoader>(
    mut processor: BatchProcessor<L>,
    folder: &Path,
    options: LoadOptions,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    // create a cancel token to stop the batch between images
    let cancel_token = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Stopping after the current image !!");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    let mut observer = ProgressObserver::new(cancel_token);
    let result = processor.process_folder_with(folder, options, &mut observer);
    observer.finish();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary(processor.config().detail_window));
    }

    if report.failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
