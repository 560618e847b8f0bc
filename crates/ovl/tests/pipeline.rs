//! End-to-end pipeline tests on small assembler files.

use std::path::{Path, PathBuf};

use ovl::{BlockId, BlockLocation, Error, OverlayConfig, Pipeline};

const DIAMOND: &str = "\t.type\tf, %function\nf:\n\tcmp\tr0, #0\n\tbne\t.L2\n\tmovs\tr0, #1\n\tbx\tlr\n.L2:\n\tmovs\tr0, #2\n\tbx\tlr\n";

const BRANCH_DIAMOND: &str = "\t.type\tf, %function\nf:\n\tcmp\tr0, #0\n\tbne\t.L2\n.L1:\n\tmov\tr1, #1\n\tb\t.L3\n.L2:\n\tmov\tr1, #2\n.L3:\n\tbx\tlr\n";

const LOOP: &str = "\t.type\tg, %function\ng:\n\tmovs\tr0, #0\n.L3:\n\tadds\tr0, r0, #1\n\tcmp\tr0, #10\n\tbne\t.L3\n\tbx\tlr\n";

fn write_unit(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn unit_name(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_build_without_units() {
    let mut pipeline = Pipeline::new(OverlayConfig::default());
    assert!(matches!(pipeline.build(), Err(Error::NoUnits)));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(OverlayConfig::default());
    let result = pipeline.load(&[dir.path().join("missing.s")]);
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_summary_counts_loops() {
    let dir = tempfile::tempdir().unwrap();
    let diamond = write_unit(dir.path(), "diamond.s", DIAMOND);
    let looped = write_unit(dir.path(), "loop.s", LOOP);

    let mut pipeline = Pipeline::new(OverlayConfig::default());
    pipeline.load(&[diamond, looped]).unwrap();
    pipeline.build().unwrap();

    let summary = pipeline.summary();
    assert_eq!(summary.units, 2);
    assert_eq!(summary.routines, 2);
    assert_eq!(summary.loop_headers, 1);
    assert!(summary.unknown_calls.is_empty());
}

#[test]
fn test_profile_overrides_estimate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), "diamond.s", DIAMOND);
    let profile = dir.path().join("profile.txt");
    std::fs::write(&profile, format!("{}:6 500\n", unit_name(&path))).unwrap();

    let mut pipeline = Pipeline::new(OverlayConfig::default());
    pipeline.load(&[path]).unwrap();
    pipeline.build().unwrap();
    pipeline.estimate_iterations();
    assert_eq!(pipeline.apply_profile(&profile).unwrap(), 1);

    let cfg = &pipeline.cfgs()[0];
    let id = cfg.block_at_line(6).unwrap();
    assert_eq!(cfg.iterations(id), 500);
}

#[test]
fn test_transform_without_ram_only_aligns() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), "diamond.s", DIAMOND);

    let mut pipeline = Pipeline::new(OverlayConfig::default());
    pipeline.load(&[path]).unwrap();
    pipeline.build().unwrap();
    assert_eq!(pipeline.place_forced(), 0);

    let transformed = pipeline.transform().unwrap();
    assert_eq!(transformed.len(), 1);
    assert_eq!(transformed[0].stats.in_ram, 0);
    assert_eq!(transformed[0].stats.instrumented, 0);
    assert!(transformed[0].text.contains(".align 2\n"));
    assert!(!transformed[0].text.contains("ramoverlay"));
    assert!(!transformed[0].text.contains("INSTRUMENTED"));
}

#[test]
fn test_forced_block_moves_to_ram() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), "diamond.s", DIAMOND);
    let name = unit_name(&path);

    let config = OverlayConfig::default().with_forced(BlockLocation {
        unit: name.clone(),
        line: 6,
    });
    let mut pipeline = Pipeline::new(config);
    pipeline.load(&[path]).unwrap();
    pipeline.build().unwrap();
    pipeline.estimate_iterations();
    assert_eq!(pipeline.place_forced(), 1);

    let transformed = pipeline.transform().unwrap();
    let unit = &transformed[0];
    assert_eq!(unit.stats.in_ram, 1);
    assert_eq!(unit.stats.instrumented, 1);
    assert!(unit.text.contains(".section ramoverlay, \"x\"\n.align 2\n.L2:\n"));
    assert!(unit.text.contains("# INSTRUMENTED 1\n"));
    assert!(unit.text.contains("    ite ne\n    ldrne r5, =.L2+1\n    ldreq r5, =fallthrough_3+1\n    bx r5\n"));
    assert!(unit.text.contains("fallthrough_3:\n"));
    assert!(!unit.text.contains("\tbne\t.L2"));

    let written = Pipeline::write_outputs(&transformed).unwrap();
    assert_eq!(written, vec![PathBuf::from(format!("{name}.out"))]);
    assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), unit.text);
}

#[test]
fn test_ram_arm_of_branch_diamond() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), "diamond.s", BRANCH_DIAMOND);

    let config = OverlayConfig::default().with_forced(BlockLocation {
        unit: unit_name(&path),
        line: 7,
    });
    let mut pipeline = Pipeline::new(config);
    pipeline.load(&[path]).unwrap();
    pipeline.build().unwrap();
    assert_eq!(pipeline.place_forced(), 1);

    let transformed = pipeline.transform().unwrap();
    let unit = &transformed[0];
    assert_eq!(unit.stats.blocks, 4);
    assert_eq!(unit.stats.in_ram, 1);
    assert_eq!(unit.stats.instrumented, 2);

    // Flash block branching into RAM: both exits go through r5.
    assert!(unit.text.contains(
        "\tcmp\tr0, #0\n    # Conditional indirect\n    ite ne\n    ldrne r5, =.L2+1\n    ldreq r5, =fallthrough_3+1\n    bx r5\n.ltorg\n.align 2\nfallthrough_3:\n.L1:\n"
    ));
    assert!(!unit.text.contains("\tbne\t.L2"));

    // Flash block staying in flash keeps its relative branch.
    assert!(!unit.text.contains("# INSTRUMENTED 4"));
    assert!(unit.text.contains("\tmov\tr1, #1\n\tb\t.L3\n.ltorg\n"));

    // RAM block falling through into flash.
    assert!(unit.text.contains("# INSTRUMENTED 7\n.section ramoverlay, \"x\"\n.align 2\n.L2:\n"));
    assert!(unit.text.contains(
        "\tmov\tr1, #2\n    # Fallthrough indirect\n    ldr pc, =fallthrough_8+1\n    .ltorg\n.text\n.align 2\n"
    ));
    assert!(unit.text.contains("fallthrough_8:\n.L3:\n"));
}

#[test]
fn test_safe_register_is_configurable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), "diamond.s", DIAMOND);

    let config = OverlayConfig::default()
        .with_safe_register("r7")
        .with_forced(BlockLocation {
            unit: unit_name(&path),
            line: 6,
        });
    let mut pipeline = Pipeline::new(config);
    pipeline.load(&[path]).unwrap();
    pipeline.build().unwrap();
    pipeline.place_forced();

    let text = &pipeline.transform().unwrap()[0].text;
    assert!(text.contains("    bx r7\n"));
    assert!(!text.contains("r5"));
}

#[test]
fn test_decision_file_places_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), "diamond.s", DIAMOND);

    let mut pipeline = Pipeline::new(OverlayConfig::default());
    pipeline.load(&[path]).unwrap();
    pipeline.build().unwrap();

    let cfg = &pipeline.cfgs()[0];
    let l2 = cfg.block_with_label(".L2").unwrap();
    let (l2_name, f_name) = (cfg.block_name(l2), cfg.block_name(BlockId::new(0)));
    assert!(!l2_name.contains('/'));
    let decision = ovl::Decision::parse(&format!(
        "#\n# Cost: 10\n#\n# Cycles: 20\n#\n#\n# RAM: 6\n{l2_name},6,1,0\n{f_name},6,0,1\nother_9,2,1,0\n"
    ))
    .unwrap();
    assert_eq!(pipeline.apply_decision(&decision), 1);

    let cfg = &pipeline.cfgs()[0];
    assert!(cfg.in_ram(l2));
    assert!(!cfg.in_ram(cfg.block_at_line(1).unwrap()));
}
