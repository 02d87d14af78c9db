use std::{env, fs};

use anyhow::Context;
use ts_rs::TS;
use utils::api::oauth::{ForumSettingsResponse, LinkedProvidersResponse, UnlinkRequest};

fn main() -> anyhow::Result<()> {
    let decls = [
        UnlinkRequest::decl(),
        LinkedProvidersResponse::decl(),
        ForumSettingsResponse::decl(),
    ];

    let mut output =
        String::from("// Generated by puls-oauth-generate-types. Do not edit by hand.\n\n");
    for decl in decls {
        output.push_str("export ");
        output.push_str(&decl);
        output.push_str("\n\n");
    }

    match env::args().nth(1) {
        Some(path) => {
            fs::write(&path, output).with_context(|| format!("failed to write `{path}`"))?
        }
        None => print!("{output}"),
    }

    Ok(())
}
