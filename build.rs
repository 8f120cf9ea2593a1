use std::error::Error;
use vergen_gitcl::{Emitter, GitclBuilder};

/// Emits the git describe string used in `vcline --version`.
/// # Errors
/// * if `git` is unavailable or the source tree is not a clone (e.g. a release tarball)
fn emit_git_describe() -> Result<(), Box<dyn Error>> {
    // dirty flag on, lightweight tags allowed
    let gitcl = GitclBuilder::default()
        .describe(true, true, None)
        .build()?;

    Emitter::default()
        .fail_on_error()
        .add_instructions(&gitcl)?
        .emit()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    if emit_git_describe().is_err() {
        // packagers can set VCLINE_GIT_DESCRIBE when building outside a clone
        let describe = option_env!("VCLINE_GIT_DESCRIBE")
            .unwrap_or("unknown");
        println!("cargo:rustc-env=VERGEN_GIT_DESCRIBE={describe}");
    }

    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-env-changed=VCLINE_GIT_DESCRIBE");
    Ok(())
}
