use std::path::Path;
use std::time::Duration;

use hashguard::{Charset, CommandCheck, HashguardError};

pub(crate) fn run(
    config: Option<&Path>,
    command: String,
    search: Option<String>,
    regex: Option<String>,
    timeout: Option<f64>,
    allow_codes: Vec<i32>,
    decode: String,
) {
    let ctx = super::load_context(config, "cmd");
    let component = ctx.component(super::OWNER);

    let charset: Charset = match decode.parse() {
        Ok(c) => c,
        Err(e) => super::fail("cmd", e),
    };
    let mut check = CommandCheck {
        command,
        search,
        regex,
        timeout: None,
        allowed_return_codes: allow_codes.into(),
        decode: charset,
    };
    if let Some(secs) = timeout {
        match Duration::try_from_secs_f64(secs) {
            Ok(d) if !d.is_zero() => check.timeout = Some(d),
            _ => super::fail(
                "cmd",
                HashguardError::Configuration {
                    message: format!("invalid timeout: {secs}"),
                },
            ),
        }
    }

    match component.commands().validate(&check) {
        Ok(true) => println!("found"),
        Ok(false) => {
            println!("not found");
            std::process::exit(1);
        }
        Err(e) => super::fail("cmd", e),
    }
}
