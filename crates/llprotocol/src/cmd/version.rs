use llprotocol_frame::{DEFAULT_MAX_FRAME_LENGTH, HEADER_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("llprotocol {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: llprotocol");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("LLPROTOCOL_BUILD_TARGET"));
    println!("profile: {}", env!("LLPROTOCOL_BUILD_PROFILE"));
    println!(
        "wire: header={HEADER_SIZE}B max_frame_length={DEFAULT_MAX_FRAME_LENGTH} (default)"
    );
    println!("features: async={}, cli=true", cfg!(feature = "async"));

    Ok(SUCCESS)
}
