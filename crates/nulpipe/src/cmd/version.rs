use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("nulpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: nulpipe");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", option_env!("NULPIPE_BUILD_TARGET").unwrap_or("unknown"));
    println!("profile: {}", option_env!("NULPIPE_BUILD_PROFILE").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "default_high_water_mark: {}",
        nulpipe_pipe::WriteBuffer::DEFAULT_HIGH_WATER_MARK
    );
    println!(
        "default_read_chunk_size: {}",
        nulpipe_transport::DEFAULT_READ_CHUNK_SIZE
    );

    Ok(SUCCESS)
}
