//! Tantivy engine for chapters
//!
//! The index lives in a `RamDirectory`; snapshots are full copies of that
//! directory written to disk and read back into RAM on load. Title matches are
//! boosted far above every other field. The boost is fixed when the query
//! parser is built and cannot be changed per query.

use crate::models::{Chapter, Combine, SearchHit};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::directory::{MmapDirectory, RamDirectory};
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Directory, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use thiserror::Error;

/// Title weight relative to the other searched fields
pub const TITLE_BOOST: f32 = 20.0;

const WRITER_HEAP_BYTES: usize = 50_000_000;
const LOCK_SUFFIX: &str = ".lock";

/// Error type for indexer operations
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("Directory error: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

struct Fields {
    id: Field,
    book_id: Field,
    title: Field,
    chapter: Field,
    chapter_title: Field,
    author: Field,
    url: Field,
    chapter_text: Field,
    chapter_notes: Field,
}

impl Fields {
    fn from_schema(schema: &Schema) -> IndexerResult<Self> {
        let field = |name: &str| schema.get_field(name).map_err(IndexerError::from);
        Ok(Self {
            id: field("id")?,
            book_id: field("book_id")?,
            title: field("title")?,
            chapter: field("chapter")?,
            chapter_title: field("chapter_title")?,
            author: field("author")?,
            url: field("url")?,
            chapter_text: field("chapter_text")?,
            chapter_notes: field("chapter_notes")?,
        })
    }

    /// Fields free-text queries run against
    fn searchable(&self) -> Vec<Field> {
        vec![
            self.title,
            self.chapter_title,
            self.author,
            self.url,
            self.chapter_text,
            self.chapter_notes,
        ]
    }
}

/// In-memory tantivy index over chapters
pub struct Indexer {
    index: Index,
    ram: RamDirectory,
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    fields: Fields,
}

impl Indexer {
    /// Create an empty engine
    pub fn new_in_memory() -> IndexerResult<Self> {
        let ram = RamDirectory::create();
        let index = Index::create(ram.clone(), Self::build_schema(), tantivy::IndexSettings::default())?;
        Self::from_parts(index, ram)
    }

    /// Load a snapshot previously written by [`Indexer::persist_to`]
    pub fn open_snapshot(path: &Path) -> IndexerResult<Self> {
        let ram = RamDirectory::create();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            // Writer locks are process-local; the new writer takes its own
            if name.to_string_lossy().ends_with(LOCK_SUFFIX) {
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            ram.atomic_write(Path::new(&name), &bytes)?;
        }

        let index = Index::open(ram.clone())?;
        Self::from_parts(index, ram)
    }

    fn from_parts(index: Index, ram: RamDirectory) -> IndexerResult<Self> {
        let fields = Fields::from_schema(&index.schema())?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Ok(Self {
            index,
            ram,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
            fields,
        })
    }

    fn build_schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("book_id", STRING | STORED);
        builder.add_text_field("title", TEXT | STORED);
        builder.add_u64_field("chapter", STORED);
        builder.add_text_field("chapter_title", TEXT | STORED);
        builder.add_text_field("author", TEXT | STORED);
        builder.add_text_field("url", TEXT | STORED);
        builder.add_text_field("chapter_text", TEXT | STORED);
        builder.add_text_field("chapter_notes", TEXT | STORED);
        builder.build()
    }

    /// Add a batch of chapters and make them searchable.
    ///
    /// Every chapter already stored for a book in the batch is discarded first,
    /// so a work that lost chapters leaves nothing behind. A chapter id that
    /// repeats inside the batch keeps its last copy.
    pub fn add_documents(&self, chapters: &[Chapter]) -> IndexerResult<()> {
        if chapters.is_empty() {
            return Ok(());
        }

        {
            let writer = self.writer.write();
            let books: BTreeSet<&str> = chapters.iter().map(|c| c.book_id.as_str()).collect();
            for book_id in books {
                writer.delete_term(Term::from_field_text(self.fields.book_id, book_id));
            }

            for chapter in chapters {
                writer.delete_term(Term::from_field_text(self.fields.id, &chapter.id));
                writer.add_document(self.to_document(chapter))?;
            }
        }

        self.commit()
    }

    fn to_document(&self, chapter: &Chapter) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, &chapter.id);
        doc.add_text(f.book_id, &chapter.book_id);
        doc.add_text(f.title, &chapter.title);
        doc.add_u64(f.chapter, chapter.chapter);
        doc.add_text(f.chapter_title, &chapter.chapter_title);
        doc.add_text(f.author, &chapter.author);
        doc.add_text(f.url, &chapter.url);
        doc.add_text(f.chapter_text, &chapter.chapter_text);
        if let Some(notes) = &chapter.chapter_notes {
            doc.add_text(f.chapter_notes, notes);
        }
        doc
    }

    fn to_chapter(&self, doc: &TantivyDocument) -> Chapter {
        let f = &self.fields;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        Chapter {
            id: text(f.id),
            book_id: text(f.book_id),
            title: text(f.title),
            chapter: doc.get_first(f.chapter).and_then(|v| v.as_u64()).unwrap_or(0),
            chapter_title: text(f.chapter_title),
            author: text(f.author),
            url: text(f.url),
            chapter_text: text(f.chapter_text),
            chapter_notes: doc
                .get_first(f.chapter_notes)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }

    pub fn commit(&self) -> IndexerResult<()> {
        self.writer.write().commit()?;
        self.reader.write().reload()?;
        Ok(())
    }

    /// Run a free-text query. Every hit the engine finds is returned, best
    /// first, minus those rejected by `filter`.
    pub fn search<F>(&self, text: &str, combine: Combine, filter: F) -> IndexerResult<Vec<SearchHit>>
    where
        F: Fn(&Chapter) -> bool,
    {
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let num_docs = searcher.num_docs() as usize;
        if num_docs == 0 {
            return Ok(Vec::new());
        }

        let mut parser = QueryParser::for_index(&self.index, self.fields.searchable());
        parser.set_field_boost(self.fields.title, TITLE_BOOST);
        if combine == Combine::And {
            parser.set_conjunction_by_default();
        }
        // Malformed user syntax degrades to whatever parsed cleanly
        let (query, _errors) = parser.parse_query_lenient(text);

        let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(num_docs))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let chapter = self.to_chapter(&doc);
            if filter(&chapter) {
                hits.push(SearchHit { chapter, score });
            }
        }

        Ok(hits)
    }

    /// Look up one chapter by id
    pub fn get(&self, id: &str) -> IndexerResult<Option<Chapter>> {
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, id),
            IndexRecordOption::Basic,
        );

        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top_docs.first() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher.doc(*address)?;
                Ok(Some(self.to_chapter(&doc)))
            }
            None => Ok(None),
        }
    }

    /// Get the number of chapters in the index
    pub fn num_docs(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }

    /// Write the whole engine into `dir`, which must exist and be empty
    pub fn persist_to(&self, dir: &Path) -> IndexerResult<()> {
        // Holding the writer keeps commits out while files are copied
        let _writer = self.writer.write();
        let dest = MmapDirectory::open(dir)?;
        self.ram.persist(&dest)?;
        dest.sync_directory()?;
        Ok(())
    }
}
