//! Build script embedding the authority certificates found in `certs/`.
//!
//! Every `<key id>.cer`, `.pem` or `.crt` file becomes an entry of the
//! bundled keyring; other files are ignored.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let certs_dir = manifest_dir.join("certs");
    println!("cargo:rerun-if-changed={}", certs_dir.display());

    let mut entries: Vec<(i64, PathBuf)> = Vec::new();
    if certs_dir.is_dir() {
        for entry in fs::read_dir(&certs_dir)? {
            let path = entry?.path();
            if let Some(key_id) = authority_key_id(&path) {
                println!("cargo:rerun-if-changed={}", path.display());
                entries.push((key_id, path));
            }
        }
    }
    entries.sort();

    let mut generated = String::from("&[\n");
    for (key_id, path) in &entries {
        generated.push_str(&format!(
            "    ({}, include_bytes!({:?}) as &[u8]),\n",
            key_id,
            path.display().to_string()
        ));
    }
    generated.push(']');

    let out = PathBuf::from(env::var("OUT_DIR")?).join("bundled_certs.rs");
    fs::write(out, generated)?;
    Ok(())
}

fn authority_key_id(path: &Path) -> Option<i64> {
    let extension = path.extension()?.to_str()?;
    if !matches!(extension, "cer" | "pem" | "crt") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
