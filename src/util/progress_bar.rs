
use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// Shared function to pull our progress bar styling
pub fn get_progress_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} stages ({percent}); ETA: {eta_precise} {msg}")
        .unwrap()
        .with_key("percent", |state: &ProgressState, w: &mut dyn std::fmt::Write| write!(w, "{:.1}%", state.fraction()*100.0).unwrap())
        .progress_chars("##-")
}

/// Builds the stage progress bar, or a hidden one when progress output is disabled
/// # Arguments
/// * `total` - number of stages that will be tracked
/// * `visible` - if false, nothing is drawn
pub fn stage_progress_bar(total: usize, visible: bool) -> ProgressBar {
    if visible {
        ProgressBar::new(total as u64).with_style(get_progress_style())
    } else {
        ProgressBar::hidden()
    }
}
