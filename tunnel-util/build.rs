use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    let desc = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR");
    let contents = format!(
        "/// Output of `git describe` at build time\npub const GIT_DESC: &str = {:?};\n",
        desc
    );
    fs::write(Path::new(&out_dir).join("version.rs"), contents).expect("write version.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
