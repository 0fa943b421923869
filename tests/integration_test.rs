use lime::{
    pack, ChecksumKind, ExtractError, Extractor, ExtractorOptions, ManifestDict, PackError,
    PackOptions,
};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_payload(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn manifest_from(text: &str) -> ManifestDict {
    lime::manifest::parse_bytes(text.as_bytes())
}

fn pack_to(dir: &TempDir, dict: &ManifestDict, options: &PackOptions) -> PathBuf {
    let output = dir.path().join("out.dat");
    pack(dict, &output, options).unwrap();
    output
}

fn extract_one(datafile: &Path, category: &str, key: &str) -> Option<Vec<u8>> {
    let extractor = Extractor::open(datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    handle.get(category, key).unwrap()
}

#[test]
fn empty_meta_round_trip() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk=\n");
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    // the @ prefix is not persisted
    assert_eq!(extract_one(&datafile, "m", "k"), Some(Vec::new()));
    assert_eq!(extract_one(&datafile, "@m", "k"), None);

    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert_eq!(handle.categories().unwrap(), ["m"]);
}

#[test]
fn single_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let bytes: Vec<u8> = (0..=255u8).collect();
    let payload = write_payload(&dir, "a.bin", &bytes);
    let dict = manifest_from(&format!("[data]\nfile = {}\n", payload.display()));
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    assert_eq!(extract_one(&datafile, "data", "file"), Some(bytes));
}

#[test]
fn meta_value_round_trip() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@metainfo]\nimportant info = Dinosaurs are awesome!\n");
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    assert_eq!(
        extract_one(&datafile, "metainfo", "important info"),
        Some(b"Dinosaurs are awesome!".to_vec())
    );
}

#[test]
fn duplicate_sources_share_one_payload() {
    let dir = TempDir::new().unwrap();
    let bytes = vec![0xABu8; 40_000];
    let payload = write_payload(&dir, "a.bin", &bytes);
    let dict = manifest_from(&format!(
        "[g]\nx = {p}\ny = {p}\n",
        p = payload.display()
    ));
    let output = dir.path().join("out.dat");
    let summary = pack(&dict, &output, &PackOptions::default()).unwrap();
    assert_eq!(summary.entries, 2);
    assert_eq!(summary.payloads, 1);
    assert_eq!(summary.dedup_hits, 1);

    let extractor = Extractor::open(&output, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    let x = handle.stat("g", "x").unwrap().unwrap();
    let y = handle.stat("g", "y").unwrap().unwrap();
    assert_eq!(x.seek_id, y.seek_id);
    assert_eq!(x.size, y.size);
    assert_eq!(handle.get("g", "x").unwrap().unwrap(), bytes);
    assert_eq!(handle.get("g", "y").unwrap().unwrap(), bytes);
}

#[test]
fn packing_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let payload = write_payload(&dir, "a.bin", b"same bytes every time");
    let text = format!("[@m]\ninfo = v\n[g]\nx = {}\n", payload.display());
    let dict = manifest_from(&text);

    let out1 = dir.path().join("one.dat");
    let out2 = dir.path().join("two.dat");
    pack(&dict, &out1, &PackOptions::default()).unwrap();
    pack(&dict, &out2, &PackOptions::default()).unwrap();
    assert_eq!(fs::read(out1).unwrap(), fs::read(out2).unwrap());
}

#[test]
fn directory_preserves_manifest_order() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@zulu]\nk2 = b\nk1 = a\n[@alpha]\nk3 = c\n");
    let options = PackOptions {
        checksum: ChecksumKind::Crc32,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    // decode the raw directory from the container tail
    let data = fs::read(&datafile).unwrap();
    let dict_size = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
    let dict_offset = data.len() - 2 - dict_size;
    let dir_bytes = lime::compress::decompress_stream(
        Cursor::new(&data[dict_offset..dict_offset + dict_size]),
        dict_size as u64,
    )
    .unwrap();

    let mut cursor = Cursor::new(&dir_bytes);
    assert_eq!(lime::codec::read_u32(&mut cursor).unwrap(), 2);
    assert_eq!(lime::codec::read_str(&mut cursor).unwrap(), "zulu");
    assert_eq!(lime::codec::read_u32(&mut cursor).unwrap(), 2);
    assert_eq!(lime::codec::read_str(&mut cursor).unwrap(), "k2");
}

#[test]
fn head_string_gating() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = v\n");
    let options = PackOptions {
        head: "alpha".to_owned(),
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    let wrong = Extractor::open(
        &datafile,
        ExtractorOptions {
            check_head_string: true,
            head_string: "beta".to_owned(),
            ..ExtractorOptions::default()
        },
    );
    let handle = wrong.acquire().unwrap();
    assert!(matches!(
        handle.get("m", "k"),
        Err(ExtractError::UnknownDatafile)
    ));
    drop(handle);

    let right = Extractor::open(
        &datafile,
        ExtractorOptions {
            check_head_string: true,
            head_string: "alpha".to_owned(),
            ..ExtractorOptions::default()
        },
    );
    let handle = right.acquire().unwrap();
    assert_eq!(handle.get("m", "k").unwrap(), Some(b"v".to_vec()));

    // the check is off by default
    assert_eq!(extract_one(&datafile, "m", "k"), Some(b"v".to_vec()));
}

#[test]
fn tampered_stored_dict_checksum_is_corrupted() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = value\n");
    let options = PackOptions {
        checksum: ChecksumKind::Crc32,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    // empty head: dict_checksum lives at offsets 8..12
    let mut data = fs::read(&datafile).unwrap();
    data[8] ^= 0xFF;
    fs::write(&datafile, &data).unwrap();

    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert!(matches!(handle.get("m", "k"), Err(ExtractError::Corrupted)));
}

#[test]
fn tampered_dict_region_fails() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = some dictionary payload\n");
    let options = PackOptions {
        checksum: ChecksumKind::Crc32,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    let mut data = fs::read(&datafile).unwrap();
    let dict_size = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
    let dict_offset = data.len() - 2 - dict_size;
    data[dict_offset + dict_size / 2] ^= 0xFF;
    fs::write(&datafile, &data).unwrap();

    // the inflate layer or the container checksum catches it, either way
    // the dictionary load fails
    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert!(matches!(
        handle.get("m", "k"),
        Err(ExtractError::Corrupted) | Err(ExtractError::Decompress(_))
    ));
}

#[test]
fn tampered_payload_region_fails() {
    let dir = TempDir::new().unwrap();
    let bytes = vec![0x5Au8; 10_000];
    let payload = write_payload(&dir, "a.bin", &bytes);
    let dict = manifest_from(&format!("[g]\nx = {}\n", payload.display()));
    let options = PackOptions {
        checksum: ChecksumKind::Crc32,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    // empty head and crc32 header: the payload region starts at offset 12
    let mut data = fs::read(&datafile).unwrap();
    data[20] ^= 0xFF;
    fs::write(&datafile, &data).unwrap();

    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert!(matches!(
        handle.get("g", "x"),
        Err(ExtractError::Corrupted) | Err(ExtractError::Decompress(_))
    ));
}

#[test]
fn integrity_check_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = value\n");
    let options = PackOptions {
        checksum: ChecksumKind::Crc32,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    let mut data = fs::read(&datafile).unwrap();
    data[8] ^= 0xFF; // stored dict checksum
    fs::write(&datafile, &data).unwrap();

    let extractor = Extractor::open(
        &datafile,
        ExtractorOptions {
            integrity_check: false,
            ..ExtractorOptions::default()
        },
    );
    let handle = extractor.acquire().unwrap();
    assert_eq!(handle.get("m", "k").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn missing_file_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[g]\nx = no_such.bin\n");
    let output = dir.path().join("out.dat");
    let err = pack(&dict, &output, &PackOptions::default()).unwrap_err();
    assert!(matches!(err, PackError::MissingFile { path } if path == "no_such.bin"));
    assert!(!output.exists());
}

#[test]
fn unknown_names_are_not_found() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = v\n");
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert_eq!(handle.get("nope", "k").unwrap(), None);
    assert_eq!(handle.get("m", "nope").unwrap(), None);
    assert_eq!(handle.stat("m", "nope").unwrap(), None);
}

#[test]
fn checksum_none_layout_and_round_trip() {
    let dir = TempDir::new().unwrap();
    let bytes = b"payload without checksums".to_vec();
    let payload = write_payload(&dir, "a.bin", &bytes);
    let dict = manifest_from(&format!("[g]\nx = {}\n", payload.display()));
    let options = PackOptions {
        checksum: ChecksumKind::None,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    let data = fs::read(&datafile).unwrap();
    assert_eq!(&data[..2], b"L)");
    assert_eq!(&data[data.len() - 2..], b"(M");

    // integrity check silently no-ops without checksums
    assert_eq!(extract_one(&datafile, "g", "x"), Some(bytes));

    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert_eq!(handle.stat("g", "x").unwrap().unwrap().checksum, 0);
}

#[test]
fn level_zero_stores_and_round_trips() {
    let dir = TempDir::new().unwrap();
    let bytes = vec![0x11u8; 5000];
    let payload = write_payload(&dir, "a.bin", &bytes);
    let dict = manifest_from(&format!("[g]\nx = {}\n", payload.display()));
    let options = PackOptions {
        level: 0,
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);
    assert_eq!(extract_one(&datafile, "g", "x"), Some(bytes));
}

#[test]
fn overlong_names_truncate_to_255_bytes() {
    let dir = TempDir::new().unwrap();
    let long_key = "k".repeat(300);
    let dict = manifest_from(&format!("[@m]\n{long_key} = v\n"));
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    let stored_key = "k".repeat(255);
    assert_eq!(extract_one(&datafile, "m", &stored_key), Some(b"v".to_vec()));
    assert_eq!(extract_one(&datafile, "m", &long_key), None);
}

#[test]
fn head_string_is_capped_at_255_bytes() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = v\n");
    let options = PackOptions {
        head: "h".repeat(400),
        ..PackOptions::default()
    };
    let datafile = pack_to(&dir, &dict, &options);

    let extractor = Extractor::open(
        &datafile,
        ExtractorOptions {
            check_head_string: true,
            head_string: "h".repeat(255),
            ..ExtractorOptions::default()
        },
    );
    let handle = extractor.acquire().unwrap();
    assert_eq!(handle.get("m", "k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn version_mismatch_detected() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = v\n");
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    let mut data = fs::read(&datafile).unwrap();
    data[2] = 2; // revision byte
    fs::write(&datafile, &data).unwrap();

    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert!(matches!(
        handle.get("m", "k"),
        Err(ExtractError::VersionMismatch)
    ));
}

#[test]
fn unknown_format_detected() {
    let dir = TempDir::new().unwrap();

    // too small to be a datafile
    let tiny = dir.path().join("tiny.dat");
    fs::write(&tiny, b"short").unwrap();
    let extractor = Extractor::open(&tiny, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert!(matches!(
        handle.get("m", "k"),
        Err(ExtractError::UnknownFormat)
    ));
    drop(handle);

    // mismatched marker pair
    let dict = manifest_from("[@m]\nk = v\n");
    let datafile = pack_to(&dir, &dict, &PackOptions::default());
    let mut data = fs::read(&datafile).unwrap();
    data[0] = b'X';
    fs::write(&datafile, &data).unwrap();
    let extractor = Extractor::open(&datafile, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert!(matches!(
        handle.get("m", "k"),
        Err(ExtractError::UnknownFormat)
    ));
}

#[test]
fn missing_datafile_fails_at_acquire() {
    let extractor = Extractor::open("no_such.dat", ExtractorOptions::default());
    assert!(matches!(
        extractor.acquire(),
        Err(ExtractError::UnableToOpen { .. })
    ));
}

#[test]
fn handle_lifecycle_and_dictionary_drop() {
    let dir = TempDir::new().unwrap();
    let dict = manifest_from("[@m]\nk = v\n");
    let datafile = pack_to(&dir, &dict, &PackOptions::default());

    let mut extractor = Extractor::open(&datafile, ExtractorOptions::default());
    {
        let first = extractor.acquire().unwrap();
        let second = extractor.acquire().unwrap();
        assert_eq!(first.get("m", "k").unwrap(), Some(b"v".to_vec()));
        drop(first);
        // the remaining handle keeps the stream usable
        assert_eq!(second.get("m", "k").unwrap(), Some(b"v".to_vec()));
    }

    // dropped back to fresh: the next get re-validates and reloads
    extractor.drop_dictionary();
    let handle = extractor.acquire().unwrap();
    assert_eq!(handle.get("m", "k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn mixed_manifest_round_trip() {
    let dir = TempDir::new().unwrap();
    let sprite = write_payload(&dir, "sprite.bin", &vec![1u8; 12_345]);
    let theme = write_payload(&dir, "theme.bin", b"ogg bytes");
    let text = format!(
        "; game assets\n\
         [graphics]\nsprite1 = {s}\nsprite2 = {s}\n\
         [audio]\ntheme = {t}\n\
         [@metainfo]\nversion = 1.4.2\n",
        s = sprite.display(),
        t = theme.display()
    );
    let dict = manifest_from(&text);
    let output = dir.path().join("game.dat");
    let summary = pack(
        &dict,
        &output,
        &PackOptions {
            checksum: ChecksumKind::Crc32,
            ..PackOptions::default()
        },
    )
    .unwrap();
    assert_eq!(summary.entries, 4);
    assert_eq!(summary.payloads, 3);
    assert_eq!(summary.dedup_hits, 1);

    let extractor = Extractor::open(&output, ExtractorOptions::default());
    let handle = extractor.acquire().unwrap();
    assert_eq!(
        handle.get("graphics", "sprite1").unwrap().unwrap().len(),
        12_345
    );
    assert_eq!(
        handle.get("audio", "theme").unwrap(),
        Some(b"ogg bytes".to_vec())
    );
    assert_eq!(
        handle.get("metainfo", "version").unwrap(),
        Some(b"1.4.2".to_vec())
    );
    let mut categories = handle.categories().unwrap();
    categories.sort();
    assert_eq!(categories, ["audio", "graphics", "metainfo"]);
}
