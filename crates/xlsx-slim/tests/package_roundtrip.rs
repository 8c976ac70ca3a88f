mod support;

use pretty_assertions::assert_eq;

use support::WorkbookBuilder;
use xlsx_slim::{extract, repack, Package, SlimError};

#[test]
fn extract_then_repack_keeps_every_part_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book.xlsx");
    let builder = WorkbookBuilder::new()
        .defined_names(r#"<definedName name="Print_Area">Sheet1!$A$1:$B$2</definedName>"#)
        .media("image1.gif", b"GIF89a not decoded".to_vec())
        .vml_reference("image1.gif")
        .calc_chain();
    builder.write(&input);

    let package = extract(&input).unwrap();
    let output = dir.path().join("copy.xlsx");
    repack(&package, &output).unwrap();

    let reread = extract(&output).unwrap();
    assert_eq!(reread.into_parts(), builder.parts());
}

#[test]
fn repack_is_byte_identical_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book.xlsm");
    WorkbookBuilder::new().calc_chain().write(&input);

    let first = dir.path().join("a.xlsm");
    let second = dir.path().join("b.xlsm");
    repack(&extract(&input).unwrap(), &first).unwrap();
    repack(&extract(&first).unwrap(), &second).unwrap();

    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[test]
fn repack_is_smaller_than_a_stored_archive() {
    let builder = WorkbookBuilder::new().part("xl/sharedStrings.xml", "<sst>".repeat(2000));
    let stored = builder.build();
    let packed = Package::from_bytes(&stored).unwrap().write_to_bytes().unwrap();
    assert!(packed.len() < stored.len(), "{} >= {}", packed.len(), stored.len());
}

#[test]
fn extract_never_modifies_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book.xlsx");
    WorkbookBuilder::new().write(&input);
    let before = std::fs::read(&input).unwrap();
    let modified = std::fs::metadata(&input).unwrap().modified().unwrap();

    extract(&input).unwrap();

    assert_eq!(std::fs::read(&input).unwrap(), before);
    assert_eq!(std::fs::metadata(&input).unwrap().modified().unwrap(), modified);
}

#[test]
fn truncated_archive_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book.xlsx");
    let bytes = WorkbookBuilder::new().build();
    std::fs::write(&input, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(extract(&input), Err(SlimError::CorruptArchive(_))));
}
