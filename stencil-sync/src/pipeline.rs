//! Render orchestration: five barrier-separated states from sources to sinks.
//!
//! | State | Sources merged with  | Runner                  | Effect                        |
//! |-------|----------------------|-------------------------|-------------------------------|
//! | 1     | `interleave_merge`   | `concurrent_apply`      | reference templates registered|
//! | 2     | `concat_merge`       | `sequential_apply`      | values layers added in order  |
//! | 3     | `concat_merge`       | `sequential_apply`      | file bundle collected         |
//! | 4     |                      |                         | env layer added, context built|
//! | 5     | `interleave_merge`   | `concurrent_apply`      | inputs rendered, `fan_out`    |
//!
//! A failure in states 1 to 4 stops the run before the next state. In
//! state 5 every input is attempted and all failures are reported together.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value as JsonValue};

use stencil_core::{
    concat_merge, concurrent_apply, concurrent_apply_limited, fan_out, interleave_merge,
    sequential_apply, wait_until_done, Failure, Item, ItemStream, PipelineFailure, Producer, Stage,
};
use stencil_renderer::{
    ContextBuilder, DecoderRegistry, EngineConfig, TemplateEngine, ENV, FILES, VALUES,
};

use crate::error::{PipelineState, SyncError};

/// Where the environment layer comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvSource {
    /// Snapshot of the process environment, taken when the context is built.
    #[default]
    Process,
    /// A fixed mapping.
    Fixed(BTreeMap<String, String>),
}

impl EnvSource {
    fn snapshot(&self) -> BTreeMap<String, String> {
        match self {
            EnvSource::Process => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
            EnvSource::Fixed(vars) => vars.clone(),
        }
    }
}

/// Items that reached the end of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// Sink outputs, one per input and sink.
    pub items: Vec<Item>,
}

impl RenderSummary {
    /// Distinct names of the rendered inputs, sorted.
    pub fn rendered(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.items.iter().map(|i| i.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Builder and runner for one render pipeline.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: EngineConfig,
    decoders: DecoderRegistry,
    inputs: Vec<Producer>,
    sinks: Vec<Stage>,
    references: Vec<Producer>,
    values: Vec<Producer>,
    files: Vec<Producer>,
    env: EnvSource,
    max_concurrency: Option<usize>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = decoders;
        self
    }

    /// Add input templates.
    pub fn from(mut self, inputs: Producer) -> Self {
        self.inputs.push(inputs);
        self
    }

    /// Add a sink; every rendered input reaches every sink.
    pub fn to(mut self, sink: Stage) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_reference_templates(mut self, references: Producer) -> Self {
        self.references.push(references);
        self
    }

    /// Add values sources. Later sources override earlier ones.
    pub fn with_values(mut self, values: Producer) -> Self {
        self.values.push(values);
        self
    }

    pub fn with_files(mut self, files: Producer) -> Self {
        self.files.push(files);
        self
    }

    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Bound the number of templates rendered at once.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Run all five states. Must be called within a tokio runtime.
    pub async fn render(self) -> Result<RenderSummary, SyncError> {
        let engine = Arc::new(TemplateEngine::new(self.config));

        // State 1: reference templates.
        let registrar = Arc::clone(&engine);
        let register = concurrent_apply(move |item: Item| {
            let result = registrar.register_reference(&item.name, &item.content);
            item.with_result(result)
        });
        drain(
            PipelineState::RegisterReferences,
            register.apply(interleave_merge(self.references).open()),
        )
        .await?;

        // State 2: values, in declaration order.
        let builder = Arc::new(Mutex::new(ContextBuilder::with_decoders(self.decoders)));
        let layers = Arc::clone(&builder);
        let add_values = sequential_apply(move |item: Item| {
            let mut builder = layers.lock().unwrap_or_else(PoisonError::into_inner);
            let result = builder
                .add_layer_by_name(&item.name, &item.content, Some(VALUES))
                .map(|_| ());
            drop(builder);
            item.with_result(result)
        });
        drain(
            PipelineState::BuildValues,
            add_values.apply(concat_merge(self.values).open()),
        )
        .await?;

        // State 3: file bundle.
        let bundle = Arc::new(Mutex::new(Map::new()));
        let store = Arc::clone(&bundle);
        let collect_files = sequential_apply(move |item: Item| {
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(item.name.clone(), JsonValue::String(item.content.clone()));
            item
        });
        drain(
            PipelineState::CollectFiles,
            collect_files.apply(concat_merge(self.files).open()),
        )
        .await?;

        // State 4: environment last, then fold.
        let context = {
            let files = std::mem::take(&mut *bundle.lock().unwrap_or_else(PoisonError::into_inner));
            let mut builder = builder.lock().unwrap_or_else(PoisonError::into_inner);
            builder.add_value("files", JsonValue::Object(files), Some(FILES));
            builder.add_env(self.env.snapshot(), Some(ENV));
            builder.build().map_err(|err| SyncError::Stage {
                state: PipelineState::Finalize,
                failure: PipelineFailure {
                    failures: vec![Failure {
                        name: "context".to_string(),
                        error: err.into(),
                    }],
                },
            })?
        };
        tracing::debug!("context built");

        // State 5: render every input and deliver it to every sink.
        let render_one = move |item: Item| match engine.render(&item.name, &item.content, &context) {
            Ok(rendered) => item.with_content(rendered),
            Err(err) => item.fail(err),
        };
        let render = match self.max_concurrency {
            Some(limit) => concurrent_apply_limited(limit, render_one),
            None => concurrent_apply(render_one),
        };
        let rendered = render.apply(interleave_merge(self.inputs).open());
        let items = drain(PipelineState::RenderAndSink, fan_out(self.sinks).apply(rendered)).await?;

        Ok(RenderSummary { items })
    }
}

async fn drain(state: PipelineState, stream: ItemStream) -> Result<Vec<Item>, SyncError> {
    wait_until_done(stream)
        .await
        .map_err(|failure| SyncError::Stage { state, failure })
}
