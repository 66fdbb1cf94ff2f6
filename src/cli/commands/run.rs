//! Run command - download a binary and execute it

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::error::DlxResult;
use crate::fetch::{ProcessRunner, TokioProcessRunner};
use crate::install::{resolve_downloaded, BinaryRequest, Installer, Platform};
use crate::ui::{TaskSpinner, UiContext};
use tracing::debug;

/// Execute the run command, returning the child's exit code
pub async fn execute(args: RunArgs, config: &Config) -> DlxResult<i32> {
    let ctx = UiContext::detect();

    let mut request = match args.name {
        Some(name) => BinaryRequest {
            url: args.url,
            name,
            integrity: None,
            force: false,
        },
        None => BinaryRequest::from_url(args.url)?,
    };
    request.integrity = args.sha256;
    request.force = args.force;

    let installer = Installer::from_config(config);

    let mut spinner = ctx.use_fancy_output().then(|| TaskSpinner::new(&ctx));
    if let Some(ref mut spinner) = spinner {
        spinner.start(&format!("Fetching {}...", request.name));
    }

    let installed = match installer.install_binary(&request).await {
        Ok(installed) => installed,
        Err(e) => {
            if let Some(ref mut spinner) = spinner {
                spinner.stop_error(&format!("Failed to fetch {}", request.name));
            }
            return Err(e);
        }
    };

    if let Some(ref mut spinner) = spinner {
        if installed.fetched {
            spinner.stop(&format!("Downloaded {}", request.name));
        } else {
            spinner.clear();
        }
    }
    debug!("Running {} from entry {}", request.name, installed.key);

    let executable = resolve_downloaded(installed.payload.path().to_path_buf(), Platform::current());
    let exit = TokioProcessRunner.run(&executable, &args.args).await?;
    Ok(exit.exit_code())
}
