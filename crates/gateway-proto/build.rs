use std::path::Path;

fn main() {
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
            unsafe {
                std::env::set_var("PROTOC", path);
            }
        }
    }

    println!("cargo:rerun-if-changed=proto/ext_proc.proto");

    let proto_file = Path::new("proto/ext_proc.proto");
    let out_dir = std::env::var("OUT_DIR").unwrap();
    let file_descriptor_set_path = Path::new(&out_dir).join("ext_proc.bin");

    tonic_build::configure()
        .build_client(false)
        .file_descriptor_set_path(file_descriptor_set_path)
        .compile_protos(&[proto_file], &["proto"])
        .expect("failed to compile ext_proc.proto");
}
