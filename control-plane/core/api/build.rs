// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

fn main() {
    // Get protoc path
    let protoc_path = protoc_bin_vendored::protoc_bin_path().unwrap();

    // export PROTOC to the environment
    unsafe {
        #[allow(clippy::disallowed_methods)]
        std::env::set_var("PROTOC", protoc_path);
    }

    // The generated src/gen/*.rs files are committed to the repository.  When
    // building from a published package (where the proto sources are
    // unavailable) the pre-generated files are used as-is and this build
    // script skips proto compilation.
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let proto_dir = std::path::Path::new(&manifest_dir).join("proto/v1");

    let proto_files = [
        proto_dir.join("networkservice.proto"),
        proto_dir.join("registry.proto"),
    ];

    if proto_files.iter().any(|f| !f.exists()) {
        // Published package: rely on the pre-generated src/gen/ files.
        return;
    }

    for f in &proto_files {
        println!("cargo:rerun-if-changed={}", f.display());
    }

    let includes = [
        proto_dir.to_str().unwrap().to_string(),
        protoc_bin_vendored::include_path()
            .unwrap()
            .to_str()
            .unwrap()
            .to_string(),
    ];

    tonic_prost_build::configure()
        .out_dir("src/gen")
        .compile_protos(
            &proto_files
                .iter()
                .map(|f| f.to_str().unwrap().to_string())
                .collect::<Vec<_>>(),
            &includes,
        )
        .unwrap();
}
