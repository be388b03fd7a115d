//! 完整的文件读写流程测试.

use std::fs;
use std::path::{Path, PathBuf};

use dwi_berry::prelude::*;
use log::LevelFilter;
use ndarray::Array4;
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;
use simple_logger::SimpleLogger;
use tempfile::{tempdir, TempDir};

const SHAPE: Idx4d = (4, 4, 2, 6);

/// 6 帧, 两个回波时间: 帧 0..3 为 TE1 (δ=10, Δ=30), 帧 3..6 为 TE2 (δ=15, Δ=40).
/// 每组第一帧为 b=0.
const BVALS: &str = "0 1000 2000 0 1000 2000\n";
const SMALL_DELTA: &str = "10\n10\n10\n15\n15\n15\n";
const BIG_DELTA: &str = "# Delta, ms\n30\n30\n30\n40\n40\n40\n";

/// 第 `t` 帧在 b=0 帧的基础上乘以 `[1, 0.5, 0.25]` 中对应的衰减.
fn synthetic() -> Array4<f32> {
    let decay = [1.0f32, 0.5, 0.25];
    Array4::from_shape_fn(SHAPE, |(x, y, z, t)| {
        let b0 = if t < 3 { 400.0 } else { 200.0 } + (x * 8 + y * 4 + z) as f32 * 4.0;
        b0 * decay[t % 3]
    })
}

fn write_tables(dir: &Path, bvals: &str, small: &str, big: &str) -> ProtocolPaths {
    let paths = ProtocolPaths::in_dir(dir);
    fs::write(&paths.bvals, bvals).unwrap();
    fs::write(&paths.small_delta, small).unwrap();
    fs::write(&paths.big_delta, big).unwrap();
    paths
}

/// 多个测试共用同一进程, 只有第一次初始化成功.
fn init_logger() {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

fn setup(data: Array4<f32>) -> (TempDir, NormalizeConfig) {
    init_logger();
    let dir = tempdir().unwrap();
    let input = dir.path().join("3_eddy_corrected");
    fs::create_dir(&input).unwrap();
    let input = input.join("sub01.nii.gz");
    DwiVolume::from_array(data)
        .unwrap()
        .save(&input, OutputGeometry::Identity)
        .unwrap();

    let output: PathBuf = dir.path().join("sub01_norm.nii.gz");
    let paths = write_tables(dir.path(), BVALS, SMALL_DELTA, BIG_DELTA);
    (dir, NormalizeConfig::new(input, output, paths))
}

#[test]
fn test_run_two_echo_times() {
    let (_dir, config) = setup(synthetic());
    let report = run(&config).unwrap();

    assert_eq!(report.shape, SHAPE);
    assert_eq!(report.clamped, 0);
    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.groups[0].frames, vec![0, 1, 2]);
    assert_eq!(report.groups[0].baselines, vec![0]);
    assert_eq!(report.groups[1].frames, vec![3, 4, 5]);
    assert_eq!(report.groups[1].baselines, vec![3]);
    assert!((report.groups[0].echo_time - 0.051).abs() < 1e-12);
    assert!((report.groups[1].echo_time - 0.071).abs() < 1e-12);

    let out = DwiVolume::open(&config.output).unwrap();
    assert_eq!(out.shape(), SHAPE);
    let expected = [1.0f32, 0.5, 0.25];
    for ((_, _, _, t), &v) in out.data().indexed_iter() {
        assert!((v - expected[t % 3]).abs() < 1e-6, "frame {t}: {v}");
    }
    assert!(!fs::read_dir(config.output.parent().unwrap())
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().starts_with(".partial-")));
}

#[test]
fn test_clamp_and_zero_guard() {
    let mut data = synthetic();
    // TE2 组 b=0 帧在 (0, 0, 0) 处为负值 -> 截断为 0 -> 基线为 0.
    data[[0, 0, 0, 3]] = -5.0;
    data[[1, 0, 0, 4]] = 0.5;
    let (_dir, config) = setup(data);
    let report = run(&config).unwrap();

    assert_eq!(report.clamped, 2);
    assert_eq!(report.groups[1].zero_baseline_voxels, 1);

    let out = DwiVolume::open(&config.output).unwrap();
    for t in 3..6 {
        assert_eq!(out[(0, 0, 0, t)], 0.0);
    }
    assert_eq!(out[(1, 0, 0, 4)], 0.0);
    assert!(out.data().iter().all(|v| v.is_finite()));
}

#[test]
fn test_identity_geometry_discards_input_transform() {
    init_logger();
    let dir = tempdir().unwrap();
    let input = dir.path().join("oblique.nii");

    let mut header = NiftiHeader::default();
    header.pixdim = [1.0, 2.0, 2.0, 3.0, 1.0, 1.0, 1.0, 1.0];
    header.sform_code = 1;
    header.srow_x = [2.0, 0.0, 0.0, -10.0];
    header.srow_y = [0.0, 2.0, 0.0, -20.0];
    header.srow_z = [0.0, 0.0, 3.0, -30.0];
    WriterOptions::new(&input)
        .reference_header(&header)
        .write_nifti(&synthetic())
        .unwrap();

    let paths = write_tables(dir.path(), BVALS, SMALL_DELTA, BIG_DELTA);
    let mut config = NormalizeConfig::new(&input, dir.path().join("identity.nii"), paths);
    run(&config).unwrap();

    let out = DwiVolume::open(&config.output).unwrap();
    assert_eq!(out.pix_dim(), [1.0, 1.0, 1.0]);
    assert_eq!(out.header().sform_code, 2);
    assert_eq!(
        out.sform(),
        [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0]
        ]
    );

    config.output = dir.path().join("inherit.nii");
    config.geometry = OutputGeometry::Inherit;
    run(&config).unwrap();
    let out = DwiVolume::open(&config.output).unwrap();
    assert_eq!(out.pix_dim(), [2.0, 2.0, 3.0]);
}

#[test]
fn test_table_length_mismatch_writes_nothing() {
    let (dir, config) = setup(synthetic());
    write_tables(dir.path(), BVALS, "10\n10\n10\n15\n15\n", BIG_DELTA);

    let e = run(&config).unwrap_err();
    assert!(matches!(
        e,
        NormError::MetadataShapeMismatch {
            expected: 6,
            found: 5,
            ..
        }
    ));
    assert!(!config.output.exists());
}

#[test]
fn test_volume_frame_mismatch_writes_nothing() {
    let (dir, config) = setup(synthetic());
    write_tables(dir.path(), "0 1000 0 1000\n", "10 10 15 15\n", "30 30 40 40\n");

    let e = run(&config).unwrap_err();
    assert!(matches!(
        e,
        NormError::MetadataShapeMismatch {
            expected: 6,
            found: 4,
            ..
        }
    ));
    assert!(!config.output.exists());
}

#[test]
fn test_empty_baseline_group_writes_nothing() {
    let (dir, config) = setup(synthetic());
    write_tables(dir.path(), "0 1000 2000 500 1000 2000\n", SMALL_DELTA, BIG_DELTA);

    match run(&config) {
        Err(NormError::EmptyBaselineGroup(te)) => assert!((te - 0.071).abs() < 1e-12),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!config.output.exists());
}

#[test]
fn test_missing_inputs() {
    let (dir, mut config) = setup(synthetic());

    config.protocol.bvals = dir.path().join("missing.bval");
    assert!(matches!(run(&config), Err(NormError::MetadataRead { .. })));

    config.protocol = ProtocolPaths::in_dir(dir.path());
    config.input = dir.path().join("missing.nii.gz");
    assert!(matches!(run(&config), Err(NormError::VolumeLoad { .. })));
    assert!(!config.output.exists());
}

#[test]
fn test_dotted_output_name() {
    let (dir, mut config) = setup(synthetic());
    config.output = dir.path().join("sub.01.dwi.nii.gz");
    run(&config).unwrap();

    let out = DwiVolume::open(&config.output).unwrap();
    assert_eq!(out.shape(), SHAPE);
    assert!(!fs::read_dir(dir.path())
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().starts_with(".partial-")));
}

#[test]
fn test_unsupported_output_checked_first() {
    let (dir, mut config) = setup(synthetic());
    // 协议表也是坏的, 但输出路径先被检查.
    config.protocol.bvals = dir.path().join("missing.bval");
    for name in ["result", "result.hdr"] {
        config.output = dir.path().join(name);
        assert!(matches!(run(&config), Err(NormError::UnsupportedOutput(_))));
        assert!(!config.output.exists());
    }
    assert!(!fs::read_dir(dir.path())
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().starts_with(".partial-")));
}

#[test]
fn test_stage_convention() {
    let (_dir, config) = setup(synthetic());
    let out = stage_output_path(&config.input).unwrap();
    assert!(out.ends_with("4_normalized_for_TE/sub01.nii.gz"));
}
