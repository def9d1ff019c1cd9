use std::path::{Path, PathBuf};

use hashguard::FileHashOptions;

pub(crate) fn run(
    config: Option<&Path>,
    file: PathBuf,
    algorithm: Option<super::AlgorithmArg>,
    hash_file: Option<PathBuf>,
    block_size: Option<usize>,
) {
    let ctx = super::load_context(config, "hash");
    let component = ctx.component(super::OWNER);
    let options = FileHashOptions {
        validator: super::algorithm_validator(algorithm),
        hash_file,
        block_size,
    };
    match component.files().hash(&file, &options) {
        Ok(digest) => println!("{digest}"),
        Err(e) => super::fail("hash", e),
    }
}
