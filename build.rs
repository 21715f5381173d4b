fn main() {
    // Release builds may stamp the commit as build metadata
    let version = match std::env::var("GIT_SHA") {
        Ok(sha) if !sha.is_empty() => format!("{}+{sha}", env!("CARGO_PKG_VERSION")),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    };
    println!("cargo:rustc-env=APP_VERSION={version}");
    println!("cargo:rerun-if-env-changed=GIT_SHA");
}
