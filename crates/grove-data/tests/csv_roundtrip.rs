//! End-to-end tests: CSV on disk -> schema inference -> re-encoding a second file.

use std::io::Write;

use grove_data::{AttributeId, DatasetReader};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn train_and_test_files_share_encoding() {
    let dir = TempDir::new().unwrap();
    let train = write(
        &dir,
        "train.csv",
        "size,shape,tag_a,tag_b\n\
         1.0,round,1,0\n\
         2.5,square,0,1\n\
         3.0,round,1,1\n\
         ?,triangle,0,0\n",
    );
    let test = write(&dir, "test.csv", "size,shape,tag_a,tag_b\n2.0,triangle,?,?\n");

    let train_ds = DatasetReader::new(&train)
        .with_targets(&["tag_a", "tag_b"])
        .with_nominal(&["tag_a", "tag_b"])
        .read()
        .expect("training file should parse");

    let schema = train_ds.schema().clone();
    assert_eq!(schema.free_attributes(), vec![AttributeId::new(0), AttributeId::new(1)]);
    assert_eq!(
        schema.restricted_attributes(),
        vec![AttributeId::new(2), AttributeId::new(3)]
    );
    assert_eq!(schema.attributes()[1].cardinality(), Some(3));

    let test_ds = DatasetReader::new(&test)
        .with_schema(schema)
        .read()
        .expect("test file should parse against training schema");

    let record = &test_ds.records()[0];
    // "triangle" was the third distinct shape seen during training.
    assert_eq!(record.value(AttributeId::new(1)), Some(2.0));
    assert!(record.is_missing(AttributeId::new(2)));
    assert!(record.is_missing(AttributeId::new(3)));
}

#[test]
fn numeric_looking_labels_need_nominal_override() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "data.csv", "x,y\n1,0\n2,1\n");

    let inferred = DatasetReader::new(&path).read().unwrap();
    assert!(inferred.schema().attributes()[1].is_numeric());

    let forced = DatasetReader::new(&path).with_nominal(&["y"]).read().unwrap();
    assert!(forced.schema().is_binary(AttributeId::new(1)));
}
