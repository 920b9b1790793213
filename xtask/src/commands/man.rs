use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;

#[derive(Args, Debug)]
pub struct ManArgs {
    /// Output directory (default: dist/share/man/man1)
    #[arg(long = "out-dir", default_value = "dist/share/man/man1")]
    pub out_dir: PathBuf,
}

pub fn cmd_man(args: ManArgs) -> Result<(), String> {
    let out_dir = crate::workspace_root().join(args.out_dir);
    fs::create_dir_all(&out_dir).map_err(|e| format!("{}: {e}", out_dir.display()))?;

    let cmd = nextver::command();
    let name = cmd.get_name().to_string();
    render_tree(&cmd, &name, &out_dir)
}

/// Write `<page>.1` for `cmd`, then recurse so that nested subcommands such
/// as `cache status` get `nextver-cache-status.1`.
fn render_tree(cmd: &clap::Command, page: &str, out_dir: &Path) -> Result<(), String> {
    let man = clap_mangen::Man::new(cmd.clone().name(page.to_string()));
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)
        .map_err(|e| format!("render manpage for {page}: {e}"))?;

    let man_path = out_dir.join(format!("{page}.1"));
    fs::write(&man_path, buffer).map_err(|e| format!("{}: {e}", man_path.display()))?;
    println!("wrote {}", man_path.display());

    for subcommand in cmd.get_subcommands().filter(|sub| sub.get_name() != "help") {
        render_tree(subcommand, &format!("{page}-{}", subcommand.get_name()), out_dir)?;
    }
    Ok(())
}
