#[allow(clippy::all)]
pub mod ext_proc {
    pub const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ext_proc.bin"));

    tonic::include_proto!("envoy.service.ext_proc.v3");
}
