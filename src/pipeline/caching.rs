//! Pipeline that stores its output and serves later requests from the store.
//!
//! The lookup happens during `prepare`, after stages are set up, so stage
//! validities can be compared. Output is captured while it streams to the
//! client and stored only once processing completed.

use std::{io::Write, sync::Arc};

use bytes::Bytes;
use http::header;
use metrics::counter;
use time::{OffsetDateTime, UtcOffset, macros::format_description};
use tracing::{debug, instrument, warn};

use super::assembly::{Assembly, execute_serialized};
use super::chain::{self, ByteTee, ClientOutput, absorb_disconnect};
use super::{EventSink, OutputTarget, PipelineState, ProcessingPipeline};
use crate::cache::{
    CacheBoundary, CacheConfig, CacheKey, CacheStore, CachedResponse, ExpiresValidity, PayloadKind,
    Validity, ValidityState,
};
use crate::environment::Environment;
use crate::error::{PipelineConfigurationError, ProcessingError};
use crate::parameters::Parameters;
use crate::registry::{GeneratorType, ReaderType, SerializerType, TransformerType};

const METRIC_CACHE_HIT: &str = "sitemap_cache_hit_total";
const METRIC_CACHE_MISS: &str = "sitemap_cache_miss_total";
const METRIC_CACHE_STORE: &str = "sitemap_cache_store_total";
const METRIC_CACHE_PURGE: &str = "sitemap_cache_purge_total";

const PARAM_EXPIRES: &str = "expires";
const PARAM_CACHE_KEY: &str = "cache-key";
const PARAM_PURGE: &str = "purge-cache";
const PARAM_CACHE_EVENTS: &str = "cache-events";

/// Outcome of the cache lookup for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Unprepared,
    Hit,
    /// Miss; output will be stored after successful processing.
    MissCacheable,
    /// Miss; nothing will be stored.
    MissUncacheable,
}

enum Lookup {
    Unprepared,
    Hit(CachedResponse),
    Miss {
        key: CacheKey,
        validities: Vec<Arc<dyn Validity>>,
        expires: Option<OffsetDateTime>,
    },
    Uncacheable,
}

pub struct CachingPipeline {
    assembly: Assembly,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    byte_ranges: bool,
    lookup: Lookup,
}

impl CachingPipeline {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig, byte_ranges: bool) -> Self {
        Self {
            assembly: Assembly::default(),
            store,
            config,
            byte_ranges,
            lookup: Lookup::Unprepared,
        }
    }

    pub fn cache_status(&self) -> CacheStatus {
        match self.lookup {
            Lookup::Unprepared => CacheStatus::Unprepared,
            Lookup::Hit(_) => CacheStatus::Hit,
            Lookup::Miss { .. } => CacheStatus::MissCacheable,
            Lookup::Uncacheable => CacheStatus::MissUncacheable,
        }
    }

    fn ensure_prepared(
        &mut self,
        env: &mut Environment,
        target: OutputTarget,
    ) -> Result<(), ProcessingError> {
        if self.assembly.state() == PipelineState::Prepared(target) {
            return Ok(());
        }
        self.prepare(env, target)
    }

    fn resolve_lookup(&self, env: &Environment, target: OutputTarget) -> Lookup {
        if !self.config.enable_cache {
            return Lookup::Uncacheable;
        }
        // Any Range header bypasses the cache, even one the range parser ignores.
        let ranged = env.request_header(header::RANGE.as_str()).is_some();
        if target == OutputTarget::Serialized && ranged {
            debug!(cache = "pipeline", outcome = "bypass", "Range request bypasses the cache");
            return Lookup::Uncacheable;
        }

        let params = self.assembly.parameters();
        let expires_secs = params.get_i64(PARAM_EXPIRES, self.config.default_expires_secs);
        if expires_secs == 0 {
            return Lookup::Uncacheable;
        }

        let key = self.cache_key(env, target);
        let (validities, expires) = if expires_secs > 0 {
            let Some(validity) = ExpiresValidity::after_secs(expires_secs) else {
                debug!(
                    cache = "pipeline",
                    key = %key,
                    expires = expires_secs,
                    outcome = "uncacheable",
                    "Expiry out of range"
                );
                return Lookup::Uncacheable;
            };
            let expires = Some(validity.expires_at());
            (vec![Arc::new(validity) as Arc<dyn Validity>], expires)
        } else {
            match self.assembly.stage_validities() {
                Some(validities) => (validities, None),
                None => {
                    debug!(
                        cache = "pipeline",
                        key = %key,
                        outcome = "uncacheable",
                        "A stage has no validity"
                    );
                    return Lookup::Uncacheable;
                }
            }
        };

        if params.get_bool(PARAM_PURGE, false) {
            let removed = self.store.remove(&key);
            counter!(METRIC_CACHE_PURGE).increment(1);
            debug!(cache = "pipeline", key = %key, removed, outcome = "purged", "Cache entry purged");
        } else {
            let hit = self.fetch_valid(&key, &validities, expires_secs).or_else(|| {
                // Bytes from another serializer are useless here, but a
                // captured event stream can be replayed through ours.
                match key.boundary() {
                    CacheBoundary::Serialized { .. } if !self.assembly.is_reader() => {
                        self.fetch_valid(&CacheKey::events(key.key()), &validities, expires_secs)
                    }
                    _ => None,
                }
            });
            if let Some(entry) = hit {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!(cache = "pipeline", key = %key, outcome = "hit", "Serving cached pipeline output");
                return Lookup::Hit(entry);
            }
        }

        counter!(METRIC_CACHE_MISS).increment(1);
        debug!(cache = "pipeline", key = %key, outcome = "miss", "Pipeline output not cached");
        Lookup::Miss {
            key,
            validities,
            expires,
        }
    }

    /// A stored entry for `key` that is still servable. Stale entries are
    /// evicted on the way.
    fn fetch_valid(
        &self,
        key: &CacheKey,
        fresh: &[Arc<dyn Validity>],
        expires_secs: i64,
    ) -> Option<CachedResponse> {
        let entry = self.store.get(key)?;
        let state = match entry.validity_state() {
            ValidityState::Unknown if expires_secs < 0 => entry.validity_against(Some(fresh)),
            ValidityState::Unknown => ValidityState::Invalid,
            decided => decided,
        };
        if state == ValidityState::Valid && payload_matches(&entry, key.boundary()) {
            return Some(entry);
        }
        self.store.remove(key);
        debug!(cache = "pipeline", key = %key, outcome = "stale", "Cached pipeline output is stale");
        None
    }

    fn cache_key(&self, env: &Environment, target: OutputTarget) -> CacheKey {
        let params = self.assembly.parameters();
        let key = params
            .get(PARAM_CACHE_KEY)
            .map(str::to_string)
            .unwrap_or_else(|| env.request_uri());

        let events = target == OutputTarget::Events
            || (!self.assembly.is_reader() && params.get_bool(PARAM_CACHE_EVENTS, false));
        if events {
            CacheKey::events(key)
        } else {
            CacheKey::serialized(key, self.assembly.terminal_name())
        }
    }

    fn apply_cache_headers(&self, env: &mut Environment) {
        if self.byte_ranges {
            env.set_header(header::ACCEPT_RANGES, "bytes");
        }
        let (expires, max_age) = match &self.lookup {
            Lookup::Hit(entry) => {
                // A replayed event stream is serialized by this pipeline.
                match (entry.kind(), entry.content_type()) {
                    (PayloadKind::Serialized, Some(content_type)) => env.set_content_type(content_type),
                    _ => self.assembly.apply_content_type(env),
                }
                let remaining = entry
                    .expires()
                    .map(|expires| (expires - OffsetDateTime::now_utc()).whole_seconds().max(0));
                (entry.expires(), remaining)
            }
            Lookup::Miss { expires, .. } => {
                let seconds = self
                    .assembly
                    .parameters()
                    .get_i64(PARAM_EXPIRES, self.config.default_expires_secs);
                (*expires, Some(seconds))
            }
            _ => (None, None),
        };

        let (Some(expires), Some(max_age)) = (expires, max_age) else {
            return;
        };
        env.set_header(header::CACHE_CONTROL, format!("max-age={max_age}"));
        match http_date(expires) {
            Some(date) => env.set_header(header::EXPIRES, date),
            None => warn!(expires = %expires, "Could not format Expires header"),
        }
    }

    fn store_output(
        &self,
        key: CacheKey,
        kind: PayloadKind,
        body: Bytes,
        validities: Vec<Arc<dyn Validity>>,
        expires: Option<OffsetDateTime>,
    ) {
        if body.len() > self.config.max_entry_bytes {
            debug!(
                cache = "pipeline",
                key = %key,
                len = body.len(),
                outcome = "skipped",
                "Output too large to cache"
            );
            return;
        }
        let Some(entry) = CachedResponse::new(kind, body, validities) else {
            return;
        };
        let entry = entry
            .with_content_type(self.assembly.mime_type().map(str::to_string))
            .with_expires(expires);
        debug!(cache = "pipeline", key = %key, outcome = "stored", "Pipeline output cached");
        self.store.store(key, entry);
        counter!(METRIC_CACHE_STORE).increment(1);
    }

    fn execute(&mut self, env: &mut Environment, out: &mut dyn Write) -> Result<(), ProcessingError> {
        let lookup = std::mem::replace(&mut self.lookup, Lookup::Unprepared);
        match lookup {
            Lookup::Hit(entry) => {
                let result = self.replay_hit(env, &entry, out);
                self.lookup = Lookup::Hit(entry);
                result
            }
            Lookup::Miss {
                key,
                validities,
                expires,
            } => {
                self.assembly.apply_content_type(env);
                let limit = self.config.max_entry_bytes;
                let stages = self.assembly.begin_execution()?;

                let (kind, body) = match key.boundary() {
                    CacheBoundary::Serialized { .. } => {
                        let mut tee = ByteTee::new(out, limit);
                        chain::run_serialized(stages, &mut tee)?;
                        tee.flush()?;
                        (PayloadKind::Serialized, tee.into_captured())
                    }
                    CacheBoundary::Events => {
                        let mut events = Vec::new();
                        chain::run_recording(stages, out, &mut events)?;
                        out.flush()?;
                        (PayloadKind::Events, Some(chain::encode_events(&events)?))
                    }
                };

                match body {
                    Some(body) => self.store_output(key, kind, body, validities, expires),
                    None => debug!(
                        cache = "pipeline",
                        key = %key,
                        outcome = "skipped",
                        "Output too large to cache"
                    ),
                }
                Ok(())
            }
            Lookup::Uncacheable | Lookup::Unprepared => {
                execute_serialized(&mut self.assembly, env, out, self.byte_ranges)
            }
        }
    }

    fn replay_hit(
        &mut self,
        env: &mut Environment,
        entry: &CachedResponse,
        out: &mut dyn Write,
    ) -> Result<(), ProcessingError> {
        let stages = self.assembly.begin_execution()?;
        match entry.kind() {
            PayloadKind::Serialized => {
                env.set_content_length(entry.body().len());
                out.write_all(entry.body())?;
            }
            PayloadKind::Events => chain::replay_serialized(stages, entry.body(), out)?,
        }
        out.flush()?;
        Ok(())
    }

    fn execute_events(&mut self, consumer: &mut dyn EventSink) -> Result<(), ProcessingError> {
        let stages = self.assembly.begin_execution()?;
        let lookup = std::mem::replace(&mut self.lookup, Lookup::Unprepared);
        match lookup {
            Lookup::Hit(entry) => {
                let result = chain::replay(entry.body(), consumer);
                self.lookup = Lookup::Hit(entry);
                result
            }
            Lookup::Miss {
                key,
                validities,
                expires,
            } => {
                let mut events = Vec::new();
                chain::run_into(stages, consumer, Some(&mut events))?;
                let body = chain::encode_events(&events)?;
                self.store_output(key, PayloadKind::Events, body, validities, expires);
                Ok(())
            }
            Lookup::Uncacheable | Lookup::Unprepared => chain::run_into(stages, consumer, None),
        }
    }
}

fn payload_matches(entry: &CachedResponse, boundary: &CacheBoundary) -> bool {
    matches!(
        (entry.kind(), boundary),
        (PayloadKind::Serialized, CacheBoundary::Serialized { .. })
            | (PayloadKind::Events, CacheBoundary::Events)
    )
}

/// RFC 7231 IMF-fixdate.
fn http_date(when: OffsetDateTime) -> Option<String> {
    when.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .ok()
}

impl ProcessingPipeline for CachingPipeline {
    fn set_parameters(&mut self, parameters: Parameters) {
        self.assembly.set_parameters(parameters);
    }

    fn parameters(&self) -> &Parameters {
        self.assembly.parameters()
    }

    fn set_generator(
        &mut self,
        ty: GeneratorType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.set_generator(ty, src, params)
    }

    fn set_reader(
        &mut self,
        ty: ReaderType,
        src: Option<String>,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.set_reader(ty, src, params, mime_type)
    }

    fn add_transformer(
        &mut self,
        ty: TransformerType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.add_transformer(ty, src, params)
    }

    fn set_serializer(
        &mut self,
        ty: SerializerType,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.set_serializer(ty, params, mime_type)
    }

    fn prepare(&mut self, env: &mut Environment, target: OutputTarget) -> Result<(), ProcessingError> {
        self.assembly.setup(env, target)?;
        self.lookup = self.resolve_lookup(env, target);
        if target == OutputTarget::Serialized {
            self.apply_cache_headers(env);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(uri = %env.uri(), pipeline = "caching"))]
    fn process(&mut self, env: &mut Environment, out: &mut dyn Write) -> Result<(), ProcessingError> {
        self.ensure_prepared(env, OutputTarget::Serialized)?;
        let mut client = ClientOutput::new(out);
        let result = self.execute(env, &mut client);
        absorb_disconnect(client.classify(result))
    }

    #[instrument(skip_all, fields(uri = %env.uri(), pipeline = "caching"))]
    fn process_events(
        &mut self,
        env: &mut Environment,
        consumer: &mut dyn EventSink,
    ) -> Result<(), ProcessingError> {
        self.ensure_prepared(env, OutputTarget::Events)?;
        self.execute_events(consumer)
    }

    fn recycle(&mut self) {
        self.assembly.recycle();
        self.lookup = Lookup::Unprepared;
    }

    fn state(&self) -> PipelineState {
        self.assembly.state()
    }

    fn mime_type(&self) -> Option<&str> {
        self.assembly.mime_type()
    }
}
