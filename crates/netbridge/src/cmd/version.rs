use netbridge_frame::{DEFAULT_MAGIC, DEFAULT_VERSION, MAX_RELAY_FRAME_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("netbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: netbridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("NETBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("NETBRIDGE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "protocol: magic={} version={}",
        String::from_utf8_lossy(&DEFAULT_MAGIC),
        DEFAULT_VERSION
    );
    println!("relay_max_frame: {MAX_RELAY_FRAME_SIZE}");
    println!("features: relay={}, cli=true", cfg!(feature = "relay"));

    Ok(SUCCESS)
}
