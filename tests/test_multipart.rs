use std::io::Cursor;
use std::path::Path;

use httpd::http::FormError;
use httpd::http::body::Body;
use httpd::http::multipart::{FileStorage, FormLimits, MultipartReader, WINDOW_SIZE};
use httpd::http::parser::read_request;
use httpd::http::reader::ConnReader;
use httpd::http::writer::ConnWriter;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

const BOUNDARY: &str = "boundary";

enum Field<'a> {
    Text(&'a str, &'a [u8]),
    File(&'a str, &'a str, &'a [u8]),
}

fn form_body(fields: &[Field<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let content = match field {
            Field::Text(name, content) => {
                out.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
                content
            }
            Field::File(name, filename, content) => {
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                content
            }
        };
        out.extend_from_slice(content);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    out
}

fn conn_reader(data: Vec<u8>) -> ConnReader {
    ConnReader::from_reader(Cursor::new(data))
}

fn limits_in(dir: &Path, max_text_memory: u64, max_file_memory: u64) -> FormLimits {
    FormLimits {
        max_text_memory,
        max_file_memory,
        spool_dir: Some(dir.to_path_buf()),
    }
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_parts_are_streamed_in_order() {
    let data = form_body(&[
        Field::Text("title", b"hello"),
        Field::File("upload", "a.txt", b"file contents"),
    ]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let mut part = mr.next_part().await.unwrap().unwrap();
    assert_eq!(part.form_name(), "title");
    assert_eq!(part.file_name(), "");
    assert_eq!(part.read_to_end().await.unwrap(), b"hello");

    let mut part = mr.next_part().await.unwrap().unwrap();
    assert_eq!(part.form_name(), "upload");
    assert_eq!(part.file_name(), "a.txt");
    assert_eq!(part.header.get("Content-Type"), Some("application/octet-stream"));
    assert_eq!(part.read_to_end().await.unwrap(), b"file contents");

    assert!(mr.next_part().await.unwrap().is_none());
    assert!(mr.next_part().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unread_part_is_skipped() {
    let data = form_body(&[Field::Text("a", b"skipped"), Field::Text("b", b"kept")]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let part = mr.next_part().await.unwrap().unwrap();
    assert_eq!(part.form_name(), "a");

    let mut part = mr.next_part().await.unwrap().unwrap();
    assert_eq!(part.form_name(), "b");
    assert_eq!(part.read_to_end().await.unwrap(), b"kept");
}

#[tokio::test]
async fn test_closed_part_yields_nothing() {
    let data = form_body(&[Field::Text("a", b"abcdef")]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let mut part = mr.next_part().await.unwrap().unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(part.read(&mut buf).await.unwrap(), 2);
    part.close().await.unwrap();
    part.close().await.unwrap();
    assert!(part.is_closed());
    assert_eq!(part.read(&mut buf).await.unwrap(), 0);

    assert!(mr.next_part().await.unwrap().is_none());
}

#[tokio::test]
async fn test_boundary_lookalikes_inside_content() {
    let mut rng = fastrand::Rng::with_seed(7);
    let decoy = format!("\r\n--{}!", &BOUNDARY[..BOUNDARY.len() - 1]);

    for size in [10, WINDOW_SIZE - 1, WINDOW_SIZE, WINDOW_SIZE + 1, 3 * WINDOW_SIZE + 17] {
        let mut content: Vec<u8> = (0..size).map(|_| rng.alphanumeric() as u8).collect();
        // Plant a delimiter prefix across the edge of the first window.
        let at = size.saturating_sub(decoy.len()).min(WINDOW_SIZE - 4);
        let tail = content.split_off(at);
        content.extend_from_slice(decoy.as_bytes());
        content.extend_from_slice(&tail);
        content.extend_from_slice(format!("--{BOUNDARY}").as_bytes());

        let data = form_body(&[Field::File("blob", "r.bin", &content), Field::Text("after", b"x")]);
        let len = data.len() as u64;
        let mut reader = conn_reader(data);
        let mut body = Body::limited(&mut reader, len);
        let mut mr = MultipartReader::new(&mut body, BOUNDARY);

        let mut part = mr.next_part().await.unwrap().unwrap();
        assert_eq!(part.read_to_end().await.unwrap(), content, "size {size}");
        let mut part = mr.next_part().await.unwrap().unwrap();
        assert_eq!(part.form_name(), "after");
        assert_eq!(part.read_to_end().await.unwrap(), b"x");
        assert!(mr.next_part().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_delimiter_mismatch() {
    let data = b"--other\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nx\r\n--other--\r\n".to_vec();
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let result = mr.next_part().await;
    assert!(matches!(result, Err(FormError::DelimiterMismatch { .. })));
}

#[tokio::test]
async fn test_truncated_body() {
    let data = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\npartial data").into_bytes();
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let mut part = mr.next_part().await.unwrap().unwrap();
    assert_eq!(part.read_to_end().await.unwrap(), b"partial data");
    assert!(matches!(mr.next_part().await, Err(FormError::UnexpectedEnd)));
}

#[tokio::test]
async fn test_read_form_spools_large_files() {
    let dir = tempfile::tempdir().unwrap();
    let big = vec![b'z'; 100];
    let data = form_body(&[
        Field::Text("title", b"hello"),
        Field::File("small", "s.txt", b"0123456789"),
        Field::File("big", "b.bin", &big),
        Field::Text("", b"nameless parts are dropped"),
    ]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let mut form = mr.read_form(&limits_in(dir.path(), 1024, 16)).await.unwrap();
    assert_eq!(form.value.get("title").map(String::as_str), Some("hello"));
    assert_eq!(form.value.len(), 1);

    let small = &form.file["small"];
    assert_eq!(small.filename, "s.txt");
    assert_eq!(small.size, 10);
    assert!(!small.is_on_disk());

    let big_file = &form.file["big"];
    assert_eq!(big_file.size, 100);
    assert!(big_file.is_on_disk());
    let path = match big_file.storage() {
        FileStorage::Disk(path) => path.clone(),
        FileStorage::Memory(_) => unreachable!(),
    };
    assert!(path.starts_with(dir.path()));

    let mut content = Vec::new();
    big_file.open().await.unwrap().read_to_end(&mut content).await.unwrap();
    assert_eq!(content, big);

    form.remove_all();
    assert!(!path.exists());
    form.remove_all();
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
#[ignore = "moves ~40 MiB through the decoder"]
async fn test_default_limits_spool_files_over_30_mib() {
    let dir = tempfile::tempdir().unwrap();
    let limits = FormLimits {
        spool_dir: Some(dir.path().to_path_buf()),
        ..FormLimits::default()
    };
    let small = vec![b's'; 8 << 20];
    let big = vec![b'b'; (30 << 20) + 1];
    let data = form_body(&[Field::File("small", "s.bin", &small), Field::File("big", "b.bin", &big)]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let mut form = mr.read_form(&limits).await.unwrap();
    assert!(!form.file["small"].is_on_disk());
    assert!(form.file["big"].is_on_disk());
    assert_eq!(form.file["big"].size, big.len() as u64);
    assert_eq!(files_in(dir.path()), 1);

    form.remove_all();
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn test_text_over_budget_fails_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let data = form_body(&[
        Field::File("big", "b.bin", &[b'z'; 64]),
        Field::Text("title", b"too long"),
    ]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let result = mr.read_form(&limits_in(dir.path(), 4, 8)).await;
    assert!(matches!(result, Err(FormError::MessageTooLarge)));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn test_replaced_file_field_removes_old_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let data = form_body(&[
        Field::File("doc", "first.bin", &[b'1'; 50]),
        Field::File("doc", "second.bin", &[b'2'; 50]),
    ]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let form = mr.read_form(&limits_in(dir.path(), 1024, 8)).await.unwrap();
    assert_eq!(form.file["doc"].filename, "second.bin");
    assert_eq!(files_in(dir.path()), 1);

    drop(form);
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn test_file_header_save() {
    let dir = tempfile::tempdir().unwrap();
    let data = form_body(&[Field::File("doc", "d.txt", b"saved bytes")]);
    let len = data.len() as u64;
    let mut reader = conn_reader(data);
    let mut body = Body::limited(&mut reader, len);
    let mut mr = MultipartReader::new(&mut body, BOUNDARY);

    let form = mr.read_form(&FormLimits::default()).await.unwrap();
    let dest = dir.path().join("copy.txt");
    form.file["doc"].save(&dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"saved bytes");
}

#[tokio::test]
async fn test_request_form_accessors() {
    let data = form_body(&[
        Field::Text("name", b"ferris"),
        Field::File("avatar", "crab.png", b"\x89PNG"),
    ]);
    let mut raw = format!(
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\n\r\n",
        data.len()
    )
    .into_bytes();
    raw.extend_from_slice(&data);

    let mut reader = conn_reader(raw);
    let writer = Mutex::new(ConnWriter::from_writer(tokio::io::sink()));
    let mut req = read_request(&mut reader, &writer, &FormLimits::default()).await.unwrap();

    assert_eq!(req.post_form("name").await, Some("ferris"));
    let file = req.form_file("avatar").await.unwrap();
    assert_eq!(file.filename, "crab.png");
    assert_eq!(file.size, 4);
    assert!(matches!(req.form_file("missing").await, Err(FormError::MissingFile(_))));
    assert_eq!(req.multipart_form().await.unwrap().value.len(), 1);
}

#[tokio::test]
async fn test_urlencoded_form() {
    let raw = b"POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 13\r\n\r\nuser=a&pass=b".to_vec();
    let mut reader = conn_reader(raw);
    let writer = Mutex::new(ConnWriter::from_writer(tokio::io::sink()));
    let mut req = read_request(&mut reader, &writer, &FormLimits::default()).await.unwrap();

    assert_eq!(req.post_form("user").await, Some("a"));
    assert_eq!(req.post_form("pass").await, Some("b"));
    assert!(matches!(req.multipart_form().await, Err(FormError::UnsupportedFormType(_))));
}

#[tokio::test]
async fn test_form_on_bodiless_method() {
    let raw = b"DELETE /x HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\n".to_vec();
    let mut reader = conn_reader(raw);
    let writer = Mutex::new(ConnWriter::from_writer(tokio::io::sink()));
    let mut req = read_request(&mut reader, &writer, &FormLimits::default()).await.unwrap();

    assert!(matches!(req.multipart_form().await, Err(FormError::MissingFormBody(_))));
    // The failure is remembered.
    assert!(matches!(req.multipart_form().await, Err(FormError::Previous(_))));
}
