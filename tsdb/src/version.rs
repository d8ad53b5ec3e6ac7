/// Shared `--version` banner for the CLI tools.
pub fn print_cli_version_banner(tool_name: &str, version: &str) {
    println!("{tool_name}");
    println!();
    println!("\tVersion:     {version}");
}
