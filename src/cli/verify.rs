use std::path::{Path, PathBuf};

use hashguard::FileCheck;

pub(crate) fn run(
    config: Option<&Path>,
    file: PathBuf,
    digest: Option<String>,
    hash_file: Option<PathBuf>,
    algorithm: Option<super::AlgorithmArg>,
    block_size: Option<usize>,
) {
    let ctx = super::load_context(config, "verify");
    let component = ctx.component(super::OWNER);
    let check = FileCheck {
        digest,
        hash_file,
        validator: super::algorithm_validator(algorithm),
        block_size,
    };
    match component.files().validate(&file, &check) {
        Ok(true) => println!("ok"),
        Ok(false) => {
            println!("mismatch");
            std::process::exit(1);
        }
        Err(e) => super::fail("verify", e),
    }
}
