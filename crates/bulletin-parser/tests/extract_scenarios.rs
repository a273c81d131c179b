//! End-to-end extraction tests over WMO-framed container files.

use std::fs;
use std::path::Path;

use bulletin_parser::config::{
    BulletinConfigEntry, BulletinType, ReportConfigEntry, ReportType, StationIdKind,
};
use bulletin_parser::framing::BulletinFormat;
use bulletin_parser::{ExtractOptions, Extractor};

const SOH: u8 = 0x01;
const ETX: u8 = 0x03;
const CRCRLF: &[u8] = b"\r\r\n";

/// Wrap a heading and body lines into a SOH/ETX bulletin frame.
fn wmo_frame(heading: &str, body_lines: &[&str]) -> Vec<u8> {
    let mut f = vec![SOH];
    f.extend_from_slice(CRCRLF);
    f.extend_from_slice(b"001");
    f.extend_from_slice(CRCRLF);
    f.extend_from_slice(heading.as_bytes());
    for line in body_lines {
        f.extend_from_slice(CRCRLF);
        f.extend_from_slice(line.as_bytes());
    }
    f.extend_from_slice(CRCRLF);
    f.push(ETX);
    f
}

/// Prefix a frame with the 10-byte WMO standard header.
fn wmo_container(frames: &[(&[u8], u8)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (frame, flag) in frames {
        out.extend_from_slice(format!("{:08}", frame.len()).as_bytes());
        out.push(b'0');
        out.push(*flag);
        out.extend_from_slice(frame);
    }
    out
}

fn write_input(dir: &Path, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join("input.b");
    fs::write(&path, data).unwrap();
    path
}

fn synop_tables() -> (Vec<BulletinConfigEntry>, Vec<ReportConfigEntry>) {
    let rcdb = vec![ReportConfigEntry {
        tt: "SM".to_string(),
        report_type: ReportType::Synop,
        station_id: StationIdKind::IIiii,
        mimj: "AAXX".to_string(),
        btime: String::new(),
        itime: String::new(),
        wid: String::new(),
    }];
    let bcdb = vec![BulletinConfigEntry {
        ttaaii: "SM////".to_string(),
        cccc: "////".to_string(),
        bulletin_type: BulletinType::Normal,
        rcdb_index: Some(0),
    }];
    (bcdb, rcdb)
}

fn metar_tables() -> (Vec<BulletinConfigEntry>, Vec<ReportConfigEntry>) {
    let rcdb = vec![ReportConfigEntry {
        tt: "SA".to_string(),
        report_type: ReportType::Metar,
        station_id: StationIdKind::Cccc,
        mimj: String::new(),
        btime: String::new(),
        itime: String::new(),
        wid: String::new(),
    }];
    let bcdb = vec![BulletinConfigEntry {
        ttaaii: "SA////".to_string(),
        cccc: "////".to_string(),
        bulletin_type: BulletinType::Normal,
        rcdb_index: Some(0),
    }];
    (bcdb, rcdb)
}

#[test]
fn single_synop_bulletin_extracted() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame("SMVD20 LOWM 010000", &["AAXX 01001", "11036 NIL="]);
    let input = write_input(tmp.path(), &wmo_container(&[(&frame, b'0')]));

    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &[], &[]);
    let summary = extractor.extract(&input, tmp.path()).unwrap();

    assert_eq!(summary.files_produced, 1);
    assert!(!input.exists(), "input must be unlinked");
    let out = fs::read(tmp.path().join("SMVD20_LOWM_010000")).unwrap();
    assert_eq!(out, frame);
    assert_eq!(summary.total_bytes, frame.len() as u64);
}

#[test]
fn nil_synop_produces_no_report_file() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame("SMVD20 LOWM 010000", &["AAXX 01001", "11036 NIL="]);
    let input = write_input(tmp.path(), &wmo_container(&[(&frame, b'0')]));

    let (bcdb, rcdb) = synop_tables();
    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        extract_reports: true,
        use_external_rules: true,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &bcdb, &rcdb);
    let summary = extractor.extract(&input, tmp.path()).unwrap();

    assert_eq!(summary.files_produced, 0);
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn two_metar_reports_become_two_files() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame(
        "SAOS31 LOWM 010000",
        &[
            "METAR",
            "LOWW 010000Z 00000KT CAVOK M01/M03 Q1020=",
            "LOWS 010000Z 36005KT 9999 FEW030 03/M01 Q1019=",
        ],
    );
    let input = write_input(tmp.path(), &wmo_container(&[(&frame, b'0')]));

    let (bcdb, rcdb) = metar_tables();
    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        extract_reports: true,
        use_external_rules: true,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &bcdb, &rcdb);
    let summary = extractor.extract(&input, tmp.path()).unwrap();

    assert_eq!(summary.files_produced, 2);
    let first = fs::read(tmp.path().join("SAOS31_LOWM_010000-LOWW")).unwrap();
    assert!(first.starts_with(b"LOWW 010000Z"));
    assert!(first.ends_with(b"="));
    let second = fs::read(tmp.path().join("SAOS31_LOWM_010000-LOWS")).unwrap();
    assert!(second.starts_with(b"LOWS 010000Z"));
    assert!(second.ends_with(b"="));
}

#[test]
fn ignored_bulletin_discarded() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame("SMVD20 LOWM 010000", &["AAXX 01001", "11036 12345="]);
    let input = write_input(tmp.path(), &wmo_container(&[(&frame, b'0')]));

    let bcdb = vec![BulletinConfigEntry {
        ttaaii: "SMVD20".to_string(),
        cccc: "LOWM".to_string(),
        bulletin_type: BulletinType::Ignore,
        rcdb_index: None,
    }];
    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        use_external_rules: true,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &bcdb, &[]);
    let summary = extractor.extract(&input, tmp.path()).unwrap();
    assert_eq!(summary.files_produced, 0);
}

#[test]
fn filter_masks_drop_non_matching_bulletins() {
    let tmp = tempfile::tempdir().unwrap();
    let sm = wmo_frame("SMVD20 LOWM 010000", &["AAXX 01001", "11036 12345="]);
    let sa = wmo_frame("SAOS31 LOWM 010000", &["METAR", "LOWW 010000Z="]);
    let input = write_input(tmp.path(), &wmo_container(&[(&sm, b'0'), (&sa, b'0')]));

    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        filter: vec![afd_common::mask::MaskGroup::parse(&["SM*"])],
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &[], &[]);
    let summary = extractor.extract(&input, tmp.path()).unwrap();
    assert_eq!(summary.files_produced, 1);
    assert!(tmp.path().join("SMVD20_LOWM_010000").exists());
}

#[test]
fn wmo_round_trip_preserves_bodies() {
    let tmp = tempfile::tempdir().unwrap();
    let frames: Vec<Vec<u8>> = (0..4)
        .map(|i| {
            let heading = format!("SMVD2{} LOWM 01000{}", i, i);
            let body = format!("payload number {} with some length padding", i);
            let mut f = heading.into_bytes();
            f.extend_from_slice(CRCRLF);
            f.extend_from_slice(body.as_bytes());
            f
        })
        .collect();
    let container = wmo_container(
        &frames
            .iter()
            .map(|f| (f.as_slice(), b'1'))
            .collect::<Vec<_>>(),
    );
    let input = write_input(tmp.path(), &container);

    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &[], &[]);
    let summary = extractor.extract(&input, tmp.path()).unwrap();

    assert_eq!(summary.files_produced, 4);
    for (i, frame) in frames.iter().enumerate() {
        let name = format!("SMVD2{}_LOWM_01000{}", i, i);
        let out = fs::read(tmp.path().join(name)).unwrap();
        assert_eq!(&out, frame);
    }
}

#[test]
fn extraction_is_idempotent_without_unique_numbers() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame("SMVD20 LOWM 010000", &["AAXX 01001", "11036 12345="]);
    let container = wmo_container(&[(&frame, b'0')]);

    let run = |dest: &Path| {
        let options = ExtractOptions {
            format: BulletinFormat::WmoStandard,
            ..Default::default()
        };
        let mut extractor = Extractor::new(options, &[], &[]);
        let mtime = chrono::Utc::now();
        extractor
            .extract_data(&container, mtime, "input.b", 0o644, dest)
            .unwrap()
    };

    let dest_a = tmp.path().join("a");
    let dest_b = tmp.path().join("b");
    fs::create_dir_all(&dest_a).unwrap();
    fs::create_dir_all(&dest_b).unwrap();
    run(&dest_a);
    run(&dest_b);

    let a = fs::read(dest_a.join("SMVD20_LOWM_010000")).unwrap();
    let b = fs::read(dest_b.join("SMVD20_LOWM_010000")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn unique_number_suffix_appended() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame("SMVD20 LOWM 010000", &["AAXX 01001", "11036 12345="]);
    let input = write_input(tmp.path(), &wmo_container(&[(&frame, b'0')]));

    let mut counter = 0x2au32;
    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        add_unique_number: true,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &[], &[]).with_unique_counter(Box::new(move || {
        counter += 1;
        counter
    }));
    let summary = extractor.extract(&input, tmp.path()).unwrap();
    assert_eq!(summary.files_produced, 1);
    assert!(tmp.path().join("SMVD20_LOWM_010000-002b").exists());
}

#[test]
fn crc_suffix_appended_to_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let frame = wmo_frame(
        "SAOS31 LOWM 010000",
        &["METAR", "LOWW 010000Z 00000KT CAVOK Q1020="],
    );
    let input = write_input(tmp.path(), &wmo_container(&[(&frame, b'0')]));

    let (bcdb, rcdb) = metar_tables();
    let options = ExtractOptions {
        format: BulletinFormat::WmoStandard,
        extract_reports: true,
        use_external_rules: true,
        add_crc_checksum: true,
        ..Default::default()
    };
    let mut extractor = Extractor::new(options, &bcdb, &rcdb);
    let summary = extractor.extract(&input, tmp.path()).unwrap();
    assert_eq!(summary.files_produced, 1);

    let produced = fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(produced.len(), 1);
    let name = &produced[0];
    assert!(name.starts_with("SAOS31_LOWM_010000-LOWW-"));
    let crc = name.rsplit('-').next().unwrap();
    // Castagnoli polynomial over the sliced report body.
    let expected = crc32c::crc32c(b"LOWW 010000Z 00000KT CAVOK Q1020=");
    assert_eq!(crc, format!("{expected:x}"));
}
