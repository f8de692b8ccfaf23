// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

fn compile(src_path: &str, stage: ShaderStage) -> Vec<u32> {
    let src = fs::read_to_string(src_path).unwrap_or_else(|e| panic!("read {src_path}: {e}"));

    let module = glsl::Frontend::default()
        .parse(&glsl::Options::from(stage), &src)
        .unwrap_or_else(|e| panic!("parse {src_path}: {e:?}"));

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .unwrap_or_else(|e| panic!("validate {src_path}: {e:?}"));

    // Sources are already written for Vulkan clip space; keep y as authored
    // so the pipeline's clockwise front face holds.
    let mut opts = spv::Options::default();
    opts.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    let pipeline = spv::PipelineOptions {
        shader_stage: stage,
        entry_point: "main".to_string(),
    };
    spv::write_vec(&module, &info, &opts, Some(&pipeline))
        .unwrap_or_else(|e| panic!("emit {src_path}: {e:?}"))
}

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR set by cargo"));

    for (src, stage, dst) in [
        ("shaders/frame.vert", ShaderStage::Vertex, "frame.vert.spv"),
        ("shaders/frame.frag", ShaderStage::Fragment, "frame.frag.spv"),
    ] {
        let words = compile(src, stage);
        fs::write(out.join(dst), bytemuck::cast_slice::<u32, u8>(&words))
            .unwrap_or_else(|e| panic!("write {dst}: {e}"));
        println!("cargo:rerun-if-changed={src}");
    }
    println!("cargo:rerun-if-changed=build.rs");
}
