//! Shared fixtures: synthetic EPUB files and listing pages
#![allow(dead_code)]

use ploogle::{IndexManager, IndexSettings};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A work to be written out as an EPUB
#[derive(Debug, Clone)]
pub struct WorkFixture {
    pub id: String,
    pub title: String,
    pub author: String,
    pub source: String,
    /// `dc:date` with the modification event
    pub modified: String,
    pub description: Option<String>,
    /// `(chapter title, body)` after the summary section
    pub chapters: Vec<(String, String)>,
}

impl WorkFixture {
    pub fn new(n: u32, title: &str, modified: &str) -> Self {
        Self {
            id: format!("urn:archive:{}", n),
            title: title.to_string(),
            author: format!("author{}", n),
            source: format!("https://archive.example/works/{}", n),
            modified: modified.to_string(),
            description: None,
            chapters: vec![("1. Beginning".to_string(), format!("{} begins here", title))],
        }
    }

    pub fn with_chapters(mut self, chapters: &[(&str, &str)]) -> Self {
        self.chapters = chapters
            .iter()
            .map(|(t, b)| (t.to_string(), b.to_string()))
            .collect();
        self
    }

    /// Number of sections, summary included
    pub fn section_count(&self) -> u64 {
        self.chapters.len() as u64 + 1
    }

    fn opf(&self) -> String {
        let mut manifest = String::from(
            r#"<item id="title_page" href="OEBPS/title_page.xhtml" media-type="application/xhtml+xml"/>"#,
        );
        let mut spine = String::from(r#"<itemref idref="title_page"/>"#);
        for i in 1..=self.chapters.len() {
            manifest.push_str(&format!(
                r#"<item id="file{i:04}" href="OEBPS/file{i:04}.xhtml" media-type="application/xhtml+xml"/>"#
            ));
            spine.push_str(&format!(r#"<itemref idref="file{i:04}"/>"#));
        }
        let description = self
            .description
            .as_ref()
            .map(|d| format!("<dc:description>{}</dc:description>", d))
            .unwrap_or_default();

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package version="2.0" xmlns="http://www.idpf.org/2007/opf" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:identifier id="id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator opf:role="aut">{author}</dc:creator>
    <dc:source>{source}</dc:source>
    {description}
    <dc:date opf:event="publication">2020-01-01</dc:date>
    <dc:date opf:event="modification">{modified}</dc:date>
  </metadata>
  <manifest>{manifest}</manifest>
  <spine toc="ncx">{spine}</spine>
</package>"#,
            id = self.id,
            title = self.title,
            author = self.author,
            source = self.source,
            modified = self.modified,
        )
    }

    fn title_page(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head>
<body><h3>{title}</h3><div>by {author}</div></body></html>"#,
            title = self.title,
            author = self.author,
        )
    }

    fn chapter_page(&self, index: usize) -> String {
        let (chapter_title, body) = &self.chapters[index - 1];
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head>
<title>{chapter_title}</title>
<meta name="chapterurl" content="{source}/chapters/{index}"/>
<meta name="chapterorigtitle" content="{chapter_title}"/>
</head>
<body><h3>{chapter_title}</h3><p>{body}</p></body></html>"#,
            source = self.source,
        )
    }

    /// Write the EPUB into `dir` and return its path
    pub fn write_to(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        zip.start_file("mimetype", options).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file("META-INF/container.xml", options).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .unwrap();

        zip.start_file("content.opf", options).unwrap();
        zip.write_all(self.opf().as_bytes()).unwrap();

        zip.start_file("OEBPS/title_page.xhtml", options).unwrap();
        zip.write_all(self.title_page().as_bytes()).unwrap();

        for i in 1..=self.chapters.len() {
            zip.start_file(format!("OEBPS/file{:04}.xhtml", i), options).unwrap();
            zip.write_all(self.chapter_page(i).as_bytes()).unwrap();
        }

        zip.finish().unwrap();
        path
    }
}

/// A listing page with one entry per `(link, display date)`
pub fn listing_page(entries: &[(&str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(link, date)| {
            format!(
                r#"<li class="work blurb group">
  <div class="header module">
    <h4 class="heading"><a href="{link}">Work</a> by <a rel="author" href="/users/x">x</a></h4>
    <p class="datetime">{date}</p>
  </div>
</li>"#
            )
        })
        .collect();
    format!(r#"<html><body><ol class="work index group">{items}</ol></body></html>"#)
}

/// Settings rooted in a temp dir with the shelf at `<root>/books`
pub fn settings(root: &Path, persist: bool) -> IndexSettings {
    IndexSettings {
        snapshot_dir: root.join("index").join("searchindex"),
        url_pool_path: root.join("index").join("urls.json"),
        document_dir: root.join("books"),
        persist,
        concurrency: 2,
    }
}

pub fn shelf(root: &Path) -> PathBuf {
    let dir = root.join("books");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn manager(root: &Path, persist: bool) -> IndexManager {
    IndexManager::new(settings(root, persist))
}
