//! Minimal end-to-end demo: upload a buffer, run a kernel over it,
//! download the result.
//!
//! Run with `cargo run --example echo`.

use scoria::glam::UVec3;
use scoria::prelude::*;

const KERNEL_SRC: &str = r#"
layout(local_size_x = 256) in;

layout(push_constant) uniform Params {
    GpuPtr data;
    uint count;
} params;

void main() {
    uint idx = gl_GlobalInvocationID.x;
    if (idx >= params.count) {
        return;
    }
    GpuPtr elem = params.data + idx * 4;
    ptr_store_u32(elem, ptr_load_u32(elem) + idx);
}
"#;

#[derive(Clone, Copy)]
#[repr(C)]
struct Params {
    data: GpuPtr,
    count: u32,
}

fn main() {
    let cfg = GpuConfig {
        gpu_heap_size_bytes: 64 * 1024 * 1024,
        ..Default::default()
    };
    let mut gpu = match Gpu::new(&cfg) {
        Ok(gpu) => gpu,
        Err(err) => {
            eprintln!("failed to initialize the GPU runtime: {err}");
            std::process::exit(1);
        }
    };

    const COUNT: u32 = 1024;
    let data = gpu.malloc(COUNT * 4);
    assert!(!data.is_null());

    let values: Vec<u8> = (0..COUNT).flat_map(|v| (v * 10).to_le_bytes()).collect();
    gpu.queue_memcpy_upload(data, &values);

    let kernel = gpu
        .kernel_init(&GpuKernelDesc {
            name: "add_index",
            source: KernelSource::Source(KERNEL_SRC),
            defines: &[],
        })
        .expect("kernel should compile");
    let group_size = gpu.kernel_group_dims1(kernel).unwrap();
    let num_groups = COUNT.div_ceil(group_size);

    gpu.queue_dispatch_with(
        kernel,
        UVec3::new(num_groups, 1, 1),
        &Params { data, count: COUNT },
    );
    let ticket = gpu.queue_memcpy_download(data, COUNT * 4);
    gpu.submit();
    gpu.flush();

    let mut result = vec![0u8; (COUNT * 4) as usize];
    gpu.get_downloaded(ticket, &mut result)
        .expect("download should be ready after a flush");

    for i in 0..COUNT {
        let offset = (i * 4) as usize;
        let value = u32::from_le_bytes(result[offset..offset + 4].try_into().unwrap());
        assert_eq!(value, i * 10 + i);
    }
    println!("echo: {COUNT} values round-tripped through the GPU heap");

    gpu.kernel_destroy(kernel);
    gpu.free(data);
}
