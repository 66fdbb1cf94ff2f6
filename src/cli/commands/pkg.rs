//! Pkg command - install a registry package and execute its binary

use crate::cli::args::PkgArgs;
use crate::config::Config;
use crate::error::DlxResult;
use crate::fetch::{ProcessRunner, TokioProcessRunner};
use crate::install::{
    resolve_package_binary, Installer, PackageRequest, PackageSpec, Platform, UpdateChecker,
};
use crate::ui::{TaskSpinner, UiContext};
use tracing::debug;

/// Execute the pkg command, returning the child's exit code
pub async fn execute(args: PkgArgs, config: &Config) -> DlxResult<i32> {
    let ctx = UiContext::detect();

    let spec = PackageSpec::parse(&args.spec)?;
    let request = PackageRequest {
        spec: spec.clone(),
        force: args.force_override(),
        integrity: args.integrity.clone(),
    };

    let installer = Installer::from_config(config);

    let mut spinner = ctx.use_fancy_output().then(|| TaskSpinner::new(&ctx));
    if let Some(ref mut spinner) = spinner {
        spinner.start(&format!("Resolving {}...", spec));
    }

    let installed = match installer.install_package(&request).await {
        Ok(installed) => installed,
        Err(e) => {
            if let Some(ref mut spinner) = spinner {
                spinner.stop_error(&format!("Failed to install {}", spec));
            }
            return Err(e);
        }
    };

    if let Some(ref mut spinner) = spinner {
        if installed.fetched {
            spinner.stop(&format!("Installed {}", spec));
        } else {
            spinner.clear();
        }
    }

    if config.update_check.enabled {
        UpdateChecker::from_config(config)
            .check(&installed, &spec)
            .await;
    }

    let executable = resolve_package_binary(
        installed.payload.path(),
        &spec.name,
        args.bin.as_deref(),
        Platform::current(),
    )
    .await?;
    debug!("Running {} from entry {}", executable.path.display(), installed.key);

    let exit = TokioProcessRunner.run(&executable, &args.args).await?;
    Ok(exit.exit_code())
}
