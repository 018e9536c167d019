//! End-to-end write/reopen/read scenarios over a real directory.

use std::fs;

use serialbox::{
    ElementType, FieldMetaInfo, OpenMode, Savepoint, SerialboxError, Serializer, StorageView,
    StorageViewMut,
};

fn field(ty: ElementType, dims: Vec<i32>) -> FieldMetaInfo {
    FieldMetaInfo::new(ty, dims).unwrap()
}

#[test]
fn write_then_read_float64_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let savepoint = Savepoint::new("s");

    {
        let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
        serializer.register_field("f", field(ElementType::Float64, vec![2, 3])).unwrap();
        let values = [1.0_f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = StorageView::of_slice(&values, vec![2, 3]).unwrap();
        serializer.write("f", &savepoint, &view).unwrap();
    }

    let serializer = Serializer::open(OpenMode::Read, dir.path(), "field").unwrap();
    let mut restored = [0.0_f64; 6];
    let mut view = StorageViewMut::of_slice(&mut restored, vec![2, 3]).unwrap();
    serializer.read("f", &savepoint, &mut view).unwrap();
    assert_eq!(restored, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn dedup_across_savepoints_shares_payload() {
    let dir = tempfile::tempdir().unwrap();
    let s1 = Savepoint::new("s1");
    let s2 = Savepoint::new("s2");

    let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
    serializer.register_field("f", field(ElementType::Float32, vec![2])).unwrap();

    let values = [1.0_f32, 2.0];
    let view = StorageView::of_slice(&values, vec![2]).unwrap();
    serializer.write("f", &s1, &view).unwrap();
    let view = StorageView::of_slice(&values, vec![2]).unwrap();
    serializer.write("f", &s2, &view).unwrap();

    // Two savepoints, one physical payload.
    let length = fs::metadata(dir.path().join("field_f.dat")).unwrap().len();
    assert_eq!(length, 8);
    let sv = serializer.savepoint_vector();
    assert_eq!(sv.get_field_id(0, "f").unwrap().id, 0);
    assert_eq!(sv.get_field_id(1, "f").unwrap().id, 0);
}

#[test]
fn distinct_content_appends_to_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
    serializer.register_field("f", field(ElementType::Float32, vec![2])).unwrap();

    let first = [1.0_f32, 2.0];
    let view = StorageView::of_slice(&first, vec![2]).unwrap();
    serializer.write("f", &Savepoint::new("s1"), &view).unwrap();

    let second = [1.0_f32, 3.0];
    let view = StorageView::of_slice(&second, vec![2]).unwrap();
    serializer.write("f", &Savepoint::new("s2"), &view).unwrap();

    let length = fs::metadata(dir.path().join("field_f.dat")).unwrap().len();
    assert_eq!(length, 16);
    let sv = serializer.savepoint_vector();
    assert_eq!(sv.get_field_id(0, "f").unwrap().id, 0);
    assert_eq!(sv.get_field_id(1, "f").unwrap().id, 1);
}

#[test]
fn duplicate_write_at_same_savepoint_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let savepoint = Savepoint::new("s1");
    let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
    serializer.register_field("f", field(ElementType::Float32, vec![2])).unwrap();

    let values = [1.0_f32, 2.0];
    let view = StorageView::of_slice(&values, vec![2]).unwrap();
    serializer.write("f", &savepoint, &view).unwrap();

    let view = StorageView::of_slice(&values, vec![2]).unwrap();
    let err = serializer.write("f", &savepoint, &view).unwrap_err();
    assert!(matches!(err, SerialboxError::FieldAlreadyAtSavepoint { .. }));

    // Nothing changed: one savepoint, one payload, 8 bytes on disk.
    assert_eq!(serializer.savepoints().len(), 1);
    let length = fs::metadata(dir.path().join("field_f.dat")).unwrap().len();
    assert_eq!(length, 8);
}

#[test]
fn full_round_trip_preserves_everything() {
    let dir = tempfile::tempdir().unwrap();

    let sp_init = Savepoint::new("init");
    let sp_step = Savepoint::new("step")
        .with_meta_info("time", 0.5_f64)
        .unwrap()
        .with_meta_info("iteration", 1_i32)
        .unwrap();

    let u = [1.5_f64, -2.5, 3.5, 4.5];
    let temperature = [273_i32, 274, 275];

    {
        let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "flow").unwrap();
        serializer.add_global_meta_info("creator", "dycore").unwrap();
        serializer.add_global_meta_info("halos", vec![2_i32, 2, 0, 0]).unwrap();
        serializer.register_field("u", field(ElementType::Float64, vec![2, 2])).unwrap();
        serializer.register_field("temperature", field(ElementType::Int32, vec![3])).unwrap();
        serializer.add_field_meta_info("u", "unit", "m/s").unwrap();

        let view = StorageView::of_slice(&u, vec![2, 2]).unwrap();
        serializer.write("u", &sp_init, &view).unwrap();
        let view = StorageView::of_slice(&u, vec![2, 2]).unwrap();
        serializer.write("u", &sp_step, &view).unwrap();
        let view = StorageView::of_slice(&temperature, vec![3]).unwrap();
        serializer.write("temperature", &sp_step, &view).unwrap();
    }

    let serializer = Serializer::open(OpenMode::Read, dir.path(), "flow").unwrap();

    assert_eq!(serializer.fieldnames(), vec!["u", "temperature"]);
    assert_eq!(serializer.savepoints().len(), 2);
    assert!(serializer.has_savepoint(&sp_init));
    assert!(serializer.has_savepoint(&sp_step));
    assert_eq!(
        serializer.get_global_meta_info_as::<String>("creator").unwrap(),
        "dycore"
    );
    assert_eq!(
        serializer.get_global_meta_info_as::<Vec<i32>>("halos").unwrap(),
        vec![2, 2, 0, 0]
    );
    assert_eq!(
        serializer
            .get_field_meta_info("u")
            .unwrap()
            .meta_info()
            .get::<String>("unit")
            .unwrap(),
        "m/s"
    );

    let mut restored = [0.0_f64; 4];
    let mut view = StorageViewMut::of_slice(&mut restored, vec![2, 2]).unwrap();
    serializer.read("u", &sp_step, &mut view).unwrap();
    assert_eq!(restored, u);

    let mut restored = [0_i32; 3];
    let mut view = StorageViewMut::of_slice(&mut restored, vec![3]).unwrap();
    serializer.read("temperature", &sp_step, &mut view).unwrap();
    assert_eq!(restored, temperature);
}

#[test]
fn savepoint_meta_key_order_is_irrelevant_for_lookup() {
    let dir = tempfile::tempdir().unwrap();

    let mut written = Savepoint::new("s");
    written.add_meta_info("i", 1_i32).unwrap();
    written.add_meta_info("j", 2_i32).unwrap();

    {
        let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
        serializer.register_field("f", field(ElementType::Float64, vec![1])).unwrap();
        let values = [42.0_f64];
        let view = StorageView::of_slice(&values, vec![1]).unwrap();
        serializer.write("f", &written, &view).unwrap();
    }

    // Same logical savepoint, keys inserted in the opposite order.
    let mut queried = Savepoint::new("s");
    queried.add_meta_info("j", 2_i32).unwrap();
    queried.add_meta_info("i", 1_i32).unwrap();

    let serializer = Serializer::open(OpenMode::Read, dir.path(), "field").unwrap();
    let mut restored = [0.0_f64];
    let mut view = StorageViewMut::of_slice(&mut restored, vec![1]).unwrap();
    serializer.read("f", &queried, &mut view).unwrap();
    assert_eq!(restored, [42.0]);
}

#[test]
fn strided_write_reads_back_contiguously() {
    let dir = tempfile::tempdir().unwrap();

    // Serialize column 0 of a 3x2 row-major matrix.
    let matrix = [10.0_f64, 11.0, 20.0, 21.0, 30.0, 31.0];
    {
        let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
        serializer.register_field("col", field(ElementType::Float64, vec![3])).unwrap();
        let bytes: &[u8] = bytemuck::cast_slice(&matrix);
        let view = StorageView::with_strides(bytes, ElementType::Float64, vec![3], vec![2]).unwrap();
        serializer.write("col", &Savepoint::new("s"), &view).unwrap();
    }

    let serializer = Serializer::open(OpenMode::Read, dir.path(), "field").unwrap();
    let mut restored = [0.0_f64; 3];
    let mut view = StorageViewMut::of_slice(&mut restored, vec![3]).unwrap();
    serializer.read("col", &Savepoint::new("s"), &mut view).unwrap();
    assert_eq!(restored, [10.0, 20.0, 30.0]);
}

#[test]
fn metadata_document_shape() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut serializer = Serializer::open(OpenMode::Write, dir.path(), "field").unwrap();
        serializer.register_field("f", field(ElementType::Float64, vec![1])).unwrap();
        let values = [1.0_f64];
        let view = StorageView::of_slice(&values, vec![1]).unwrap();
        serializer.write("f", &Savepoint::new("s"), &view).unwrap();
    }

    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("MetaData-field.json")).unwrap())
            .unwrap();
    assert_eq!(meta["serialbox_version"], 261);
    assert_eq!(meta["prefix"], "field");
    assert!(meta["field_map"]["field_map"]["f"].is_object());
    assert_eq!(meta["savepoint_vector"][0]["savepoint"]["name"], "s");
    assert_eq!(meta["savepoint_vector"][0]["fields"]["f"][0], 0);

    let archive: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("ArchiveMetaData-field.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(archive["archive_name"], "Binary");
    assert_eq!(archive["checksum_algorithm"], "sha256");
    assert_eq!(archive["fields_table"]["f"][0][0], 0);
    // 64 hex chars of SHA-256.
    assert_eq!(archive["fields_table"]["f"][0][1].as_str().unwrap().len(), 64);
}
