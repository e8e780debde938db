mod common;

use std::{collections::HashSet, fs, sync::Arc};

use metrics_util::debugging::DebuggingRecorder;
use sitemap_pipeline::environment::Environment;
use sitemap_pipeline::infra::telemetry::describe_metrics;
use sitemap_pipeline::parameters::{ParameterTemplates, VariableResolver};
use sitemap_pipeline::pipeline::PipelineFactory;
use sitemap_pipeline::processor::{
    BuildContext, FileSource, ProcessorServices, Source, TreeBuilder, TreeProcessor,
};
use sitemap_pipeline::tree::{GenerateNode, NodeRef, PipelineNode, PipelinesNode, SerializeNode};
use sitemap_pipeline::ProcessingError;

use common::{Counters, rewrite};

fn sitemap(source: &dyn Source, ctx: &BuildContext<'_>) -> Result<NodeRef, ProcessingError> {
    let content = source
        .content()
        .map_err(|err| ProcessingError::with_source("unreadable sitemap", err))?;
    if content.as_ref() == b"broken" {
        return Err(ProcessingError::processing("broken definition"));
    }

    let registry = ctx.registry();
    let pipeline = PipelineNode::new(vec![
        Arc::new(
            GenerateNode::new(registry.generator(None)?)
                .with_src(VariableResolver::parse("metrics")?),
        ),
        Arc::new(SerializeNode::new(registry.serializer(None)?)),
    ])
    .with_parameters(ParameterTemplates::parse([("expires", "60")])?);
    Ok(Arc::new(PipelinesNode::new(vec![Arc::new(pipeline)])))
}

#[test]
fn processing_emits_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    describe_metrics();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sitemap");
    fs::write(&path, "ok").expect("write sitemap");

    let counters = Arc::new(Counters::default());
    let builder: Arc<dyn TreeBuilder> = Arc::new(sitemap);
    let processor = TreeProcessor::new(
        Arc::new(FileSource::new(&path)),
        common::registry(&counters),
        ProcessorServices::new(builder, PipelineFactory::default()).with_reload(
            sitemap_pipeline::processor::ReloadSettings {
                check_reload: true,
                reload_delay_ms: 0,
            },
        ),
    );

    // miss + store, then hit
    for _ in 0..2 {
        processor
            .process(&mut Environment::new("page"), &mut Vec::new())
            .expect("process");
    }
    assert_eq!(counters.generated(), 1);

    // failed rebuild keeps serving the old tree
    rewrite(&path, "broken", 10);
    processor
        .process(&mut Environment::new("page"), &mut Vec::new())
        .expect("old tree");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "sitemap_cache_hit_total",
        "sitemap_cache_miss_total",
        "sitemap_cache_store_total",
        "sitemap_tree_rebuild_total",
        "sitemap_tree_rebuild_failed_total",
        "sitemap_tree_build_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
