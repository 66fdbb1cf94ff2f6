//! Terminal UI
//!
//! Everything here writes to stderr (stdout belongs to the executed
//! program) and degrades to plain tagged lines in CI or when piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use dlx::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Downloading tool...");
//! // ... fetch ...
//! spinner.stop("Downloaded tool");
//!
//! if ui::confirm(&ctx, "Remove 12 entries?", false).await? {
//!     ui::step_ok(&ctx, "Removed 12 entries");
//! }
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{remark, step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::TaskSpinner;
pub use prompts::confirm;
