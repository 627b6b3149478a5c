//! Packs the files under `embedded/` into a single content blob plus an
//! index, so the lookup table is one symbol instead of one static per file.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let embed_dir = PathBuf::from("embedded");

    println!("cargo:rerun-if-changed=embedded");

    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    if embed_dir.is_dir() {
        collect(&embed_dir, &mut entries);
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut blob = fs::File::create(out_dir.join("bundle.bin")).expect("create bundle.bin");
    let mut index = String::new();
    let mut offset: u64 = 0;
    for (name, data) in &entries {
        blob.write_all(data).expect("write bundle.bin");
        index.push_str(&format!("{}\t{}\t{}\n", name, offset, data.len()));
        offset += data.len() as u64;
    }
    fs::write(out_dir.join("bundle.idx"), index).expect("write bundle.idx");
}

fn collect(dir: &Path, entries: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).expect("read embedded dir") {
        let entry = entry.expect("read embedded dir entry");
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == "README.md" {
            continue;
        }
        if path.is_dir() {
            collect(&path, entries);
        } else {
            let data = fs::read(&path).expect("read embedded file");
            entries.push((name, data));
        }
    }
}
