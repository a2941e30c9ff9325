use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // a protoc on the build host wins over the bundled one
    if env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| format!("bundled protoc: {:?}", e))?;
        env::set_var("PROTOC", protoc);
    }
    let well_known = protoc_bin_vendored::include_path().map_err(|e| format!("bundled protos: {:?}", e))?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[PathBuf::from("proto/csi.proto")], &[PathBuf::from("proto"), well_known])?;
    Ok(())
}
