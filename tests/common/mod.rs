#![allow(dead_code)]

use std::{
    fs, io,
    io::Write,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use sitemap_pipeline::cache::{NopValidity, TimestampValidity, Validity};
use sitemap_pipeline::pipeline::{
    Event, EventSink, Generator, Reader, Serializer, Stage, StageContext, Transformer,
};
use sitemap_pipeline::registry::ComponentKind;
use sitemap_pipeline::{ComponentRegistry, ProcessingError};

/// Shared instrumentation for the test stages.
#[derive(Debug, Default)]
pub struct Counters {
    pub generated: AtomicUsize,
    pub read: AtomicUsize,
    /// Seconds since the epoch reported by the `stamped` generator.
    pub stamp: AtomicU64,
}

impl Counters {
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn read(&self) -> usize {
        self.read.load(Ordering::SeqCst)
    }

    pub fn touch(&self, secs: u64) {
        self.stamp.store(secs, Ordering::SeqCst);
    }
}

/// Emits its `src` (or `text` parameter) as a single text node.
struct Echo {
    counters: Arc<Counters>,
    text: String,
    stamped: bool,
}

impl Stage for Echo {
    fn setup(&mut self, ctx: &StageContext<'_>) -> Result<(), ProcessingError> {
        self.text = ctx
            .src
            .or_else(|| ctx.params.get("text"))
            .unwrap_or_default()
            .to_string();
        Ok(())
    }

    fn validity(&self) -> Option<Arc<dyn Validity>> {
        if !self.stamped {
            return None;
        }
        let secs = self.counters.stamp.load(Ordering::SeqCst);
        Some(Arc::new(TimestampValidity::new(
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        )))
    }
}

impl Generator for Echo {
    fn generate(&mut self, sink: &mut dyn EventSink) -> Result<(), ProcessingError> {
        self.counters.generated.fetch_add(1, Ordering::SeqCst);
        sink.event(Event::StartDocument)?;
        sink.event(Event::start("body"))?;
        sink.event(Event::text(self.text.clone()))?;
        sink.event(Event::end("body"))?;
        sink.event(Event::EndDocument)
    }
}

struct Upper;

impl Stage for Upper {
    fn validity(&self) -> Option<Arc<dyn Validity>> {
        Some(Arc::new(NopValidity))
    }
}

impl Transformer for Upper {
    fn transform(&mut self, event: Event, next: &mut dyn EventSink) -> Result<(), ProcessingError> {
        match event {
            Event::Characters { text } => next.event(Event::text(text.to_uppercase())),
            other => next.event(other),
        }
    }
}

/// Writes text nodes only.
struct Text;

impl Stage for Text {
    fn validity(&self) -> Option<Arc<dyn Validity>> {
        Some(Arc::new(NopValidity))
    }
}

impl Serializer for Text {
    fn mime_type(&self) -> Option<String> {
        Some("text/plain".to_string())
    }

    fn serialize(&mut self, event: Event, out: &mut dyn Write) -> Result<(), ProcessingError> {
        if let Event::Characters { text } = event {
            out.write_all(text.as_bytes())?;
        }
        Ok(())
    }
}

/// Writes elements as tags.
struct Markup;

impl Stage for Markup {
    fn validity(&self) -> Option<Arc<dyn Validity>> {
        Some(Arc::new(NopValidity))
    }
}

impl Serializer for Markup {
    fn mime_type(&self) -> Option<String> {
        Some("text/html".to_string())
    }

    fn serialize(&mut self, event: Event, out: &mut dyn Write) -> Result<(), ProcessingError> {
        match event {
            Event::StartElement { name, .. } => write!(out, "<{name}>")?,
            Event::EndElement { name } => write!(out, "</{name}>")?,
            Event::Characters { text } => out.write_all(text.as_bytes())?,
            _ => {}
        }
        Ok(())
    }
}

/// Writes `resource:<src>`.
struct Resource {
    counters: Arc<Counters>,
    src: String,
}

impl Stage for Resource {
    fn setup(&mut self, ctx: &StageContext<'_>) -> Result<(), ProcessingError> {
        self.src = ctx.src.unwrap_or_default().to_string();
        Ok(())
    }

    fn validity(&self) -> Option<Arc<dyn Validity>> {
        Some(Arc::new(NopValidity))
    }
}

impl Reader for Resource {
    fn mime_type(&self) -> Option<String> {
        Some("application/octet-stream".to_string())
    }

    fn read(&mut self, out: &mut dyn Write) -> Result<(), ProcessingError> {
        self.counters.read.fetch_add(1, Ordering::SeqCst);
        write!(out, "resource:{}", self.src)?;
        Ok(())
    }
}

/// Registry with the test stages:
/// generators `echo` (default) and `stamped`, transformer `upper`,
/// serializers `text` (default) and `markup`, reader `resource`.
pub fn registry(counters: &Arc<Counters>) -> Arc<ComponentRegistry> {
    let registry = ComponentRegistry::with_builtins();

    let p = Arc::clone(counters);
    registry.register_generator("echo", move || {
        Box::new(Echo {
            counters: Arc::clone(&p),
            text: String::new(),
            stamped: false,
        })
    });
    let p = Arc::clone(counters);
    registry.register_generator("stamped", move || {
        Box::new(Echo {
            counters: Arc::clone(&p),
            text: String::new(),
            stamped: true,
        })
    });
    registry.register_transformer("upper", || Box::new(Upper));
    registry.register_serializer("text", || Box::new(Text));
    registry.register_serializer("markup", || Box::new(Markup));
    let p = Arc::clone(counters);
    registry.register_reader("resource", move || {
        Box::new(Resource {
            counters: Arc::clone(&p),
            src: String::new(),
        })
    });

    registry.set_default(ComponentKind::Generator, "echo");
    registry.set_default(ComponentKind::Serializer, "text");
    registry.set_default(ComponentKind::Reader, "resource");

    Arc::new(registry)
}

/// Accepts `limit` bytes, then reports a broken pipe.
pub struct FlakyClient {
    pub written: Vec<u8>,
    pub limit: usize,
}

impl Write for FlakyClient {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit.saturating_sub(self.written.len());
        if room == 0 {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let taken = room.min(buf.len());
        self.written.extend_from_slice(&buf[..taken]);
        Ok(taken)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Rewrite `path` and push its modification time `secs` into the future so
/// the change is visible whatever the filesystem's stamp granularity.
pub fn rewrite(path: &Path, content: &str, secs: u64) {
    fs::write(path, content).expect("write sitemap");
    let file = fs::File::options().write(true).open(path).expect("open sitemap");
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .expect("set mtime");
}
