use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pcache_core::blob;
use pcache_core::device::{DeviceIdentity, ShaderStage};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints a single pipeline blob's header, chunk list, and checksum
    /// verdict.
    DumpBlob {
        in_path: PathBuf,

        #[arg(long, help = "Expected vendor_id, decimal or 0x-hex.", default_value = "0")]
        vendor_id: String,
        #[arg(long, help = "Expected device_id, decimal or 0x-hex.", default_value = "0")]
        device_id: String,
        #[arg(long, help = "Expected build identity.", default_value = "0")]
        build: u64,
        #[arg(long, help = "Expected shader interface key.", default_value = "0")]
        shader_interface_key: u64,
        #[arg(
            long,
            help = "Root signature compat hash this blob must have been built with.",
            default_value = "0"
        )]
        root_signature_hash: u64,
    },
    /// Prints a pipeline library's header, per-section TOC entry count,
    /// and every pipeline name present.
    DumpLibrary {
        in_path: PathBuf,

        #[arg(long, help = "Expected vendor_id, decimal or 0x-hex.", default_value = "0")]
        vendor_id: String,
        #[arg(long, help = "Expected device_id, decimal or 0x-hex.", default_value = "0")]
        device_id: String,
        #[arg(long, help = "Expected build identity.", default_value = "0")]
        build: u64,
        #[arg(long, help = "Expected shader interface key.", default_value = "0")]
        shader_interface_key: u64,
    },
}

fn parse_int(s: &str) -> anyhow::Result<u32> {
    if let Some(hex) = s.strip_prefix("0x") {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse()?)
    }
}

fn read_file(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn identity_from_args(
    vendor_id: &str,
    device_id: &str,
    build: u64,
    shader_interface_key: u64,
) -> anyhow::Result<DeviceIdentity> {
    Ok(DeviceIdentity {
        vendor_id: parse_int(vendor_id)?,
        device_id: parse_int(device_id)?,
        build,
        shader_interface_key,
        cache_uuid: [0u8; 16],
    })
}

const ALL_STAGES: &[(ShaderStage, &str)] = &[
    (ShaderStage::VERTEX, "vertex"),
    (ShaderStage::TESS_CONTROL, "tess_control"),
    (ShaderStage::TESS_EVAL, "tess_eval"),
    (ShaderStage::GEOMETRY, "geometry"),
    (ShaderStage::FRAGMENT, "fragment"),
    (ShaderStage::COMPUTE, "compute"),
];

fn dump_blob(
    in_path: PathBuf,
    vendor_id: String,
    device_id: String,
    build: u64,
    shader_interface_key: u64,
    root_signature_hash: u64,
) -> anyhow::Result<()> {
    let bytes = read_file(&in_path)?;
    let identity = identity_from_args(&vendor_id, &device_id, build, shader_interface_key)?;

    println!("file: {}", in_path.display());
    println!("size: {} bytes", bytes.len());

    if bytes.len() < blob::HEADER_LEN {
        println!("verdict: too short to contain a header ({} bytes needed)", blob::HEADER_LEN);
        return Ok(());
    }

    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    println!("magic: 0x{:08x} ({})", magic, if magic == blob::PIPELINE_BLOB_MAGIC { "ok" } else { "mismatch" });
    println!("vendor_id: 0x{:08x}", u32::from_le_bytes(bytes[4..8].try_into().unwrap()));
    println!("device_id: 0x{:08x}", u32::from_le_bytes(bytes[8..12].try_into().unwrap()));
    println!("checksum: 0x{:08x}", u32::from_le_bytes(bytes[12..16].try_into().unwrap()));
    println!("build: 0x{:016x}", u64::from_le_bytes(bytes[16..24].try_into().unwrap()));
    println!(
        "shader_interface_key: 0x{:016x}",
        u64::from_le_bytes(bytes[24..32].try_into().unwrap())
    );

    for (stage, name) in ALL_STAGES {
        if blob::find_chunk(
            blob::payload(&bytes),
            blob::chunk_type(blob::ChunkKind::VarintSpirv, *stage),
        )
        .is_some()
        {
            println!("stage present: {}", name);
        }
    }
    if blob::find_chunk(
        blob::payload(&bytes),
        blob::chunk_type(blob::ChunkKind::PipelineCache, ShaderStage::empty()),
    )
    .is_some()
    {
        println!("driver pipeline cache chunk: present");
    }

    match blob::validate(&bytes, &identity, root_signature_hash) {
        Ok(()) => println!("verdict: valid for the given identity and root signature hash"),
        Err(e) => println!("verdict: {}", e),
    }

    Ok(())
}

fn dump_library(
    in_path: PathBuf,
    vendor_id: String,
    device_id: String,
    build: u64,
    shader_interface_key: u64,
) -> anyhow::Result<()> {
    let bytes = read_file(&in_path)?;
    let identity = identity_from_args(&vendor_id, &device_id, build, shader_interface_key)?;

    println!("file: {}", in_path.display());
    println!("size: {} bytes", bytes.len());

    let library = match pcache::PipelineLibrary::from_bytes(identity, &bytes) {
        Ok(l) => l,
        Err(e) => {
            println!("verdict: {}", e);
            return Ok(());
        }
    };

    let (pso_count, spirv_count, driver_cache_count) = library.entry_counts();
    println!("pso entries: {}", pso_count);
    println!("spirv_cache entries: {}", spirv_count);
    println!("driver_cache entries: {}", driver_cache_count);
    println!("serialized_size (recomputed): {}", library.serialized_size());

    for name in library.pipeline_names() {
        println!("pipeline: {}", String::from_utf8_lossy(&name));
    }

    println!("verdict: header and table of contents are well-formed");

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::DumpBlob {
            in_path,
            vendor_id,
            device_id,
            build,
            shader_interface_key,
            root_signature_hash,
        } => dump_blob(in_path, vendor_id, device_id, build, shader_interface_key, root_signature_hash),
        Command::DumpLibrary {
            in_path,
            vendor_id,
            device_id,
            build,
            shader_interface_key,
        } => dump_library(in_path, vendor_id, device_id, build, shader_interface_key),
    }
}
