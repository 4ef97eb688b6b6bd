use std::sync::Arc;

use crate::cogt::llm::LlmDeck;
use crate::cogt::ContentGenerator;
use crate::core::concept_library::ConceptLibrary;
use crate::core::config::PipelexConfig;
use crate::core::domain::DomainLibrary;
use crate::core::error::PipelexError;
use crate::core::func_registry::FuncRegistry;
use crate::core::pipe::{LibraryContext, PipeOutput};
use crate::core::pipe_library::PipeLibrary;
use crate::core::pipe_run_params::PipeOutputMultiplicity;
use crate::core::router::{PipeRouter, PipeRouterProtocol};
use crate::core::working_memory::WorkingMemory;
use crate::mission::execute::execute_mission;
use crate::mission::manager::MissionManager;
use crate::mission::report::InferenceReportManager;
use crate::mission::tracker::{MissionTracker, NoopMissionTracker};

/// Everything a pipe run needs to reach: libraries, providers and mission
/// bookkeeping. Built once after loading, then shared read-only.
#[derive(Clone)]
pub struct PipelexContext {
    config: Arc<PipelexConfig>,
    domain_library: Arc<DomainLibrary>,
    concept_library: Arc<ConceptLibrary>,
    pipe_library: Arc<PipeLibrary>,
    llm_deck: Arc<LlmDeck>,
    content_generator: Arc<dyn ContentGenerator>,
    func_registry: Arc<FuncRegistry>,
    router: Arc<dyn PipeRouterProtocol>,
    mission_manager: Arc<MissionManager>,
    mission_tracker: Arc<dyn MissionTracker>,
    report_manager: Arc<InferenceReportManager>,
}

impl PipelexContext {
    pub fn builder(content_generator: Arc<dyn ContentGenerator>) -> PipelexContextBuilder {
        PipelexContextBuilder::new(content_generator)
    }

    pub fn config(&self) -> &PipelexConfig {
        &self.config
    }

    pub fn domain_library(&self) -> &DomainLibrary {
        &self.domain_library
    }

    pub fn concept_library(&self) -> &ConceptLibrary {
        &self.concept_library
    }

    pub fn pipe_library(&self) -> &PipeLibrary {
        &self.pipe_library
    }

    pub fn llm_deck(&self) -> &LlmDeck {
        &self.llm_deck
    }

    pub fn content_generator(&self) -> &dyn ContentGenerator {
        self.content_generator.as_ref()
    }

    pub fn func_registry(&self) -> &FuncRegistry {
        &self.func_registry
    }

    pub fn router(&self) -> &dyn PipeRouterProtocol {
        self.router.as_ref()
    }

    pub fn mission_manager(&self) -> &MissionManager {
        &self.mission_manager
    }

    pub fn mission_tracker(&self) -> &dyn MissionTracker {
        self.mission_tracker.as_ref()
    }

    pub fn report_manager(&self) -> &InferenceReportManager {
        &self.report_manager
    }

    pub fn library_context(&self) -> LibraryContext<'_> {
        LibraryContext {
            config: &self.config,
            domain_library: &self.domain_library,
            concept_library: &self.concept_library,
            pipe_library: &self.pipe_library,
            llm_deck: &self.llm_deck,
        }
    }

    /// Runs `pipe_code` as a new mission. Returns the output and the mission
    /// id, which stays open until [`close_mission`](Self::close_mission).
    /// A mission whose run fails is closed before the error is returned.
    pub async fn execute(
        &self,
        pipe_code: &str,
        working_memory: Option<WorkingMemory>,
        output_name: Option<&str>,
        output_multiplicity: Option<PipeOutputMultiplicity>,
        dynamic_output_concept_code: Option<&str>,
    ) -> Result<(PipeOutput, String), PipelexError> {
        execute_mission(
            self,
            pipe_code,
            working_memory,
            output_name,
            output_multiplicity,
            dynamic_output_concept_code,
        )
        .await
    }

    /// Tears down everything kept for a mission.
    pub fn close_mission(&self, mission_id: &str) {
        self.mission_manager.close_mission(mission_id);
        self.mission_tracker.close_mission(mission_id);
        self.report_manager.close_registry(mission_id);
    }
}

pub struct PipelexContextBuilder {
    config: PipelexConfig,
    domain_library: DomainLibrary,
    concept_library: ConceptLibrary,
    pipe_library: PipeLibrary,
    llm_deck: LlmDeck,
    content_generator: Arc<dyn ContentGenerator>,
    func_registry: FuncRegistry,
    router: Arc<dyn PipeRouterProtocol>,
    mission_tracker: Arc<dyn MissionTracker>,
    report_manager: Arc<InferenceReportManager>,
}

impl PipelexContextBuilder {
    pub fn new(content_generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            config: PipelexConfig::default(),
            domain_library: DomainLibrary::new(),
            concept_library: ConceptLibrary::new(),
            pipe_library: PipeLibrary::new(),
            llm_deck: LlmDeck::default(),
            content_generator,
            func_registry: FuncRegistry::new(),
            router: Arc::new(PipeRouter),
            mission_tracker: Arc::new(NoopMissionTracker),
            report_manager: Arc::new(InferenceReportManager::new()),
        }
    }

    pub fn with_config(mut self, config: PipelexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_libraries(
        mut self,
        domain_library: DomainLibrary,
        concept_library: ConceptLibrary,
        pipe_library: PipeLibrary,
    ) -> Self {
        self.domain_library = domain_library;
        self.concept_library = concept_library;
        self.pipe_library = pipe_library;
        self
    }

    pub fn with_llm_deck(mut self, llm_deck: LlmDeck) -> Self {
        self.llm_deck = llm_deck;
        self
    }

    pub fn with_func_registry(mut self, func_registry: FuncRegistry) -> Self {
        self.func_registry = func_registry;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn PipeRouterProtocol>) -> Self {
        self.router = router;
        self
    }

    pub fn with_mission_tracker(mut self, mission_tracker: Arc<dyn MissionTracker>) -> Self {
        self.mission_tracker = mission_tracker;
        self
    }

    pub fn with_report_manager(mut self, report_manager: Arc<InferenceReportManager>) -> Self {
        self.report_manager = report_manager;
        self
    }

    /// Freezes the libraries. Fails if the configuration is invalid.
    pub fn build(self) -> Result<PipelexContext, PipelexError> {
        self.config.validate()?;
        Ok(PipelexContext {
            config: Arc::new(self.config),
            domain_library: Arc::new(self.domain_library),
            concept_library: Arc::new(self.concept_library),
            pipe_library: Arc::new(self.pipe_library),
            llm_deck: Arc::new(self.llm_deck),
            content_generator: self.content_generator,
            func_registry: Arc::new(self.func_registry),
            router: self.router,
            mission_manager: Arc::new(MissionManager::new()),
            mission_tracker: self.mission_tracker,
            report_manager: self.report_manager,
        })
    }
}
