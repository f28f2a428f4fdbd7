//! EPUB extraction: one e-book file becomes one `Book` with ordered chapters
//!
//! Reads `META-INF/container.xml` to locate the package document, takes work
//! metadata from the OPF `<metadata>` block and walks the spine in order. Each
//! spine section becomes one chapter; section 0 is the summary unit.

use crate::models::{collapse_whitespace, Book, BookInfo, Chapter, SUMMARY_TITLE};
use crate::timestamps::parse_timestamp;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const EPUB_EXTENSION: &str = "epub";

static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[name]").expect("valid selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));
static CHAPTER_NOTES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.fff_chapter_notes").expect("valid selector"));

/// Error type for e-book extraction
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Malformed XML in {path}: {source}")]
    Xml {
        path: String,
        #[source]
        source: roxmltree::Error,
    },
    #[error("Missing {0} in package metadata")]
    MissingMetadata(&'static str),
    #[error("Extraction worker failed: {0}")]
    Worker(String),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

/// Package document contents needed to build chapters
#[derive(Debug, Default)]
struct Package {
    identifier: Option<String>,
    title: Option<String>,
    authors: Vec<String>,
    source: Option<String>,
    description: Option<String>,
    /// `(event, value)` for every `dc:date`, in document order
    dates: Vec<(Option<String>, String)>,
    /// `(idref, href)` in reading order
    spine: Vec<(String, String)>,
}

impl Package {
    fn info(&self) -> ExtractResult<BookInfo> {
        let last_update = self
            .dates
            .iter()
            .find(|(event, _)| event.as_deref() == Some("modification"))
            .or_else(|| self.dates.last())
            .and_then(|(_, value)| parse_timestamp(value));

        Ok(BookInfo {
            book_id: self.identifier.clone().ok_or(ExtractError::MissingMetadata("identifier"))?,
            title: self.title.clone().ok_or(ExtractError::MissingMetadata("title"))?,
            author: self.authors.join(", "),
            url: self.source.clone().ok_or(ExtractError::MissingMetadata("source"))?,
            description: self
                .description
                .as_deref()
                .map(html_to_text)
                .filter(|d| !d.is_empty()),
            last_update,
        })
    }
}

/// Extract a whole work, chapters included
pub fn extract_book(path: &Path) -> ExtractResult<Book> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let (opf_path, package) = read_package(&mut archive)?;
    let info = package.info()?;

    let base = opf_path.rfind('/').map(|i| &opf_path[..=i]).unwrap_or("");
    let mut chapters = Vec::with_capacity(package.spine.len());
    for (index, (idref, href)) in package.spine.iter().enumerate() {
        let xhtml = read_entry(&mut archive, &format!("{}{}", base, href))?;
        chapters.push(build_chapter(&info, idref, index as u64, &xhtml));
    }

    Ok(Book { info, chapters })
}

/// Read only the work metadata, skipping chapter bodies
pub fn read_book_info(path: &Path) -> ExtractResult<BookInfo> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let (_, package) = read_package(&mut archive)?;
    package.info()
}

/// List the e-book files of a document directory, sorted by path
pub fn list_books(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut books = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_epub = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(EPUB_EXTENSION));
        if entry.file_type()?.is_file() && is_epub {
            books.push(path);
        }
    }
    books.sort();
    Ok(books)
}

/// Run an extraction over many files on blocking threads, at most `concurrency`
/// at a time. Results come back in input order.
pub async fn extract_all<T, F>(
    paths: Vec<PathBuf>,
    concurrency: usize,
    extract: F,
) -> Vec<(PathBuf, ExtractResult<T>)>
where
    T: Send + 'static,
    F: Fn(&Path) -> ExtractResult<T> + Copy + Send + 'static,
{
    stream::iter(paths)
        .map(|path| async move {
            let worker_path = path.clone();
            let result = tokio::task::spawn_blocking(move || extract(&worker_path))
                .await
                .unwrap_or_else(|e| Err(ExtractError::Worker(e.to_string())));
            (path, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

// ─────────────────────────────────────────────────────────────────────────────
// PACKAGE DOCUMENT
// ─────────────────────────────────────────────────────────────────────────────

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> ExtractResult<String> {
    let mut entry = archive.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

fn read_package<R: Read + Seek>(archive: &mut ZipArchive<R>) -> ExtractResult<(String, Package)> {
    let container = read_entry(archive, CONTAINER_PATH)?;
    let opf_path = rootfile_path(&container)?;
    let opf = read_entry(archive, &opf_path)?;
    let package = parse_package(&opf, &opf_path)?;
    Ok((opf_path, package))
}

fn parse_xml<'a>(text: &'a str, path: &str) -> ExtractResult<roxmltree::Document<'a>> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    roxmltree::Document::parse_with_options(text, options).map_err(|source| ExtractError::Xml {
        path: path.to_string(),
        source,
    })
}

fn rootfile_path(container: &str) -> ExtractResult<String> {
    let doc = parse_xml(container, CONTAINER_PATH)?;
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "rootfile")
        .and_then(|n| n.attribute("full-path"))
        .map(str::to_string)
        .ok_or(ExtractError::MissingMetadata("rootfile"))
}

fn node_text(node: roxmltree::Node) -> String {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    text.trim().to_string()
}

fn parse_package(opf: &str, opf_path: &str) -> ExtractResult<Package> {
    let doc = parse_xml(opf, opf_path)?;
    let mut package = Package::default();
    let mut manifest: HashMap<&str, &str> = HashMap::new();

    for node in doc.descendants().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "identifier" if package.identifier.is_none() => {
                package.identifier = Some(node_text(node)).filter(|t| !t.is_empty());
            }
            "title" if package.title.is_none() => {
                package.title = Some(node_text(node)).filter(|t| !t.is_empty());
            }
            "creator" => {
                let author = node_text(node);
                if !author.is_empty() {
                    package.authors.push(author);
                }
            }
            "source" if package.source.is_none() => {
                package.source = Some(node_text(node)).filter(|t| !t.is_empty());
            }
            "description" if package.description.is_none() => {
                package.description = Some(node_text(node));
            }
            "date" => {
                let event = node
                    .attributes()
                    .find(|a| a.name() == "event")
                    .map(|a| a.value().to_string());
                package.dates.push((event, node_text(node)));
            }
            "item" => {
                if let (Some(id), Some(href)) = (node.attribute("id"), node.attribute("href")) {
                    manifest.insert(id, href);
                }
            }
            _ => {}
        }
    }

    // Spine order is reading order; manifest lookups need the full manifest first
    for itemref in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "itemref")
    {
        let Some(idref) = itemref.attribute("idref") else {
            continue;
        };
        if let Some(href) = manifest.get(idref) {
            package.spine.push((idref.to_string(), href.to_string()));
        }
    }

    Ok(package)
}

// ─────────────────────────────────────────────────────────────────────────────
// CHAPTERS
// ─────────────────────────────────────────────────────────────────────────────

/// Text of an element with block boundaries kept as word breaks
fn element_text(element: ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_text(fragment.root_element())
}

fn build_chapter(info: &BookInfo, section_id: &str, index: u64, xhtml: &str) -> Chapter {
    let doc = Html::parse_document(xhtml);

    let chapter_text = element_text(doc.select(&BODY).next().unwrap_or_else(|| doc.root_element()));

    let chapter_notes = info.description.clone().or_else(|| {
        doc.select(&CHAPTER_NOTES)
            .next()
            .map(element_text)
            .filter(|notes| !notes.is_empty())
    });

    let mut chapter = Chapter {
        id: Chapter::compose_id(&info.book_id, section_id),
        book_id: info.book_id.clone(),
        title: info.title.clone(),
        chapter: index,
        chapter_title: SUMMARY_TITLE.to_string(),
        author: info.author.clone(),
        url: info.url.clone(),
        chapter_text,
        chapter_notes,
    };

    for meta in doc.select(&META) {
        let content = meta.value().attr("content").map(str::trim).unwrap_or("");
        match meta.value().attr("name") {
            Some("chapterurl") if !content.is_empty() => chapter.url = content.to_string(),
            Some("chapterorigtitle") if !content.is_empty() => {
                chapter.chapter_title = content.to_string()
            }
            _ => {}
        }
    }

    chapter
}
