use anyhow::Result;
use docsplit::descriptor::{ByteRange, PartitionDescriptor};
use docsplit::document::{Document, encode};
use docsplit::error::SplitError;
use docsplit::reader::{open_reader, open_reader_with};
use docsplit::testing::{
    MemoryCollection, TempDirPath, document_offsets, sample_documents, write_document_file,
};
use std::fs;

fn is_malformed(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|c| matches!(c.downcast_ref::<SplitError>(), Some(SplitError::MalformedDocument(_))))
}

#[test]
fn reads_only_documents_starting_inside_the_range() -> Result<()> {
    let dir = TempDirPath::new()?;
    let path = dir.file_path("data.bson");
    let docs = sample_documents(20);
    let len = write_document_file(&path, &docs)?;
    let starts = document_offsets(&docs)?;
    let source = path.to_string_lossy();

    let middle = PartitionDescriptor::file(&*source, ByteRange::new(starts[5], starts[12]));
    let got = open_reader(&middle)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(got, docs[5..12]);

    let tail = PartitionDescriptor::file(&*source, ByteRange::new(starts[12], len));
    let got = open_reader(&tail)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(got, docs[12..]);

    let to_eof = PartitionDescriptor::file(&*source, ByteRange::to_eof(starts[18]));
    assert_eq!(open_reader(&to_eof)?.count(), 2);
    Ok(())
}

#[test]
fn document_crossing_the_end_is_malformed() -> Result<()> {
    let dir = TempDirPath::new()?;
    let path = dir.file_path("data.bson");
    let docs = sample_documents(10);
    write_document_file(&path, &docs)?;
    let starts = document_offsets(&docs)?;

    // End one byte into document #3: documents 0..3 are fine, #3 crosses.
    let range = ByteRange::new(0, starts[3] + 1);
    let part = PartitionDescriptor::file(path.to_string_lossy(), range);
    let mut stream = open_reader(&part)?;
    for expected in &docs[..3] {
        assert_eq!(&stream.next().unwrap()?, expected);
    }
    let err = stream.next().unwrap().unwrap_err();
    assert!(is_malformed(&err), "{err:#}");
    assert!(stream.next().is_none());
    Ok(())
}

#[test]
fn corrupt_body_is_yielded_once_then_the_stream_ends() -> Result<()> {
    let dir = TempDirPath::new()?;
    let path = dir.file_path("corrupt.bson");
    let good = Document::new().with("ok", true);
    let mut bytes = encode(&good)?;
    let mut bad = encode(&Document::new().with("x", 1))?;
    bad[4] = 0x7f; // unknown element tag
    bytes.extend(bad);
    bytes.extend(encode(&good)?);
    fs::write(&path, &bytes)?;

    let part = PartitionDescriptor::file(path.to_string_lossy(), ByteRange::to_eof(0));
    let results: Vec<_> = open_reader(&part)?.collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), &good);
    assert!(is_malformed(results[1].as_ref().unwrap_err()));
    Ok(())
}

#[test]
fn truncated_tail_is_malformed_but_clean_eof_is_not() -> Result<()> {
    let dir = TempDirPath::new()?;
    let path = dir.file_path("data.bson");
    let docs = sample_documents(4);
    let len = write_document_file(&path, &docs)?;
    let part = PartitionDescriptor::file(path.to_string_lossy(), ByteRange::to_eof(0));
    assert_eq!(open_reader(&part)?.collect::<Result<Vec<_>>>()?, docs);

    // A range claiming more bytes than the file has still ends cleanly.
    let long = PartitionDescriptor::file(path.to_string_lossy(), ByteRange::new(0, len + 100));
    assert_eq!(open_reader(&long)?.count(), 4);

    let mut bytes = fs::read(&path)?;
    bytes.extend_from_slice(&[9, 0]);
    fs::write(&path, &bytes)?;
    let last = open_reader(&part)?.last().unwrap();
    assert!(is_malformed(&last.unwrap_err()));
    Ok(())
}

#[test]
fn collection_partitions_need_a_source() -> Result<()> {
    let part = PartitionDescriptor::builder("mongodb://h/db.c").limit(3).build();
    assert!(open_reader(&part).is_err());

    let collection = MemoryCollection::new(sample_documents(10));
    let got = open_reader_with(&part, &collection)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(got, sample_documents(3));
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let part = PartitionDescriptor::file("/definitely/not/here.bson", ByteRange::to_eof(0));
    let err = open_reader(&part).err().unwrap();
    assert!(format!("{err:#}").contains("/definitely/not/here.bson"));
}
