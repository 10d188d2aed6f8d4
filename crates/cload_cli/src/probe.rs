//! `cload probe` prints the toolchain environment the loader would build with.

use cload_toolchain::{Environment, Prober};

use crate::project::{load_project_config, resolve_project_root};
use crate::{GlobalArgs, ProbeArgs, ReportFormat};

/// Runs the `cload probe` command.
///
/// Returns exit code 0 when a usable compiler was found. Probe failures are
/// returned as errors.
pub fn run(args: &ProbeArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = load_project_config(&root)?;
    let env = Prober::shared(&config.toolchain).probe()?;

    match args.format {
        ReportFormat::Text => print!("{}", render_text(&env)),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&*env)?),
    }
    Ok(0)
}

fn render_text(env: &Environment) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "cc:        {} ({})\n",
        env.cc.path.display(),
        env.cc.version_line()
    ));
    match &env.cxx {
        Some(cxx) => out.push_str(&format!(
            "c++:       {} ({})\n",
            cxx.path.display(),
            cxx.version_line()
        )),
        None => out.push_str("c++:       (none, using cc)\n"),
    }
    out.push_str(&format!(
        "platform:  {}-{} (.{})\n",
        env.platform.os, env.platform.arch, env.platform.artifact_suffix
    ));
    out.push_str(&format!("link:      {}\n", env.platform.link_flags.join(" ")));
    for dir in &env.include_dirs {
        out.push_str(&format!("include:   {}\n", dir.display()));
    }
    for dir in &env.library_dirs {
        out.push_str(&format!("library:   {}\n", dir.display()));
    }
    if !env.cflags.is_empty() {
        out.push_str(&format!("cflags:    {}\n", env.cflags.join(" ")));
    }
    if !env.ldflags.is_empty() {
        out.push_str(&format!("ldflags:   {}\n", env.ldflags.join(" ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cload_toolchain::{Compiler, Platform};
    use std::path::PathBuf;

    fn environment() -> Environment {
        Environment {
            cc: Compiler {
                path: PathBuf::from("/usr/bin/cc"),
                version: "cc (Fake) 1.0\nCopyright".to_string(),
            },
            cxx: None,
            include_dirs: vec![PathBuf::from("/opt/include")],
            library_dirs: Vec::new(),
            cflags: vec!["-Wall".to_string()],
            ldflags: Vec::new(),
            platform: Platform {
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                artifact_suffix: "so".to_string(),
                link_flags: vec!["-shared".to_string()],
            },
        }
    }

    #[test]
    fn text_lists_drivers_and_paths() {
        let text = render_text(&environment());
        assert!(text.contains("cc:        /usr/bin/cc (cc (Fake) 1.0)"));
        assert!(text.contains("(none, using cc)"));
        assert!(text.contains("linux-x86_64 (.so)"));
        assert!(text.contains("include:   /opt/include"));
        assert!(text.contains("cflags:    -Wall"));
        assert!(!text.contains("ldflags"));
    }

    #[test]
    fn json_is_structured() {
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&environment()).unwrap()).unwrap();
        assert_eq!(json["cc"]["path"], "/usr/bin/cc");
        assert_eq!(json["platform"]["artifact_suffix"], "so");
        assert!(json["cxx"].is_null());
    }
}
