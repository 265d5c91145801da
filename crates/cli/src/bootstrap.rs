//! Wire the core subsystems for the host process.

use anyhow::{Context, Result};
use olav::Settings;
use olav::audit::JsonlAuditSink;
use olav::capability::CapabilityRegistry;
use olav::fleet::credentials::EnvCredentialProvider;
use olav::fleet::replay::ReplayTransport;
use olav::fleet::{
    DeviceTransport, FleetEngine, NoTemplates, StaticInventory, UnconfiguredTransport,
};
use olav::inspect::{InspectionRunner, SkillCatalog};
use olav::knowledge::{KnowledgeStore, SearchIndex};
use olav::session::{SessionManager, SqliteThreadStore};
use olav::tools::ToolRegistry;
use olav::tools::builtins::standard_registry;
use std::path::Path;
use std::sync::Arc;

pub struct App {
    pub settings: Settings,
    pub registry: Arc<CapabilityRegistry>,
    pub catalog: Arc<SkillCatalog>,
    pub engine: Arc<FleetEngine>,
    pub store: Arc<KnowledgeStore>,
    pub manager: Arc<SessionManager>,
}

impl App {
    pub async fn bootstrap(agent_dir: &Path) -> Result<Self> {
        let settings = Settings::load(agent_dir)
            .with_context(|| format!("loading settings from {}", agent_dir.display()))?;
        settings.ensure_layout()?;

        let registry = Arc::new(CapabilityRegistry::new(
            settings.commands_dir(),
            settings.apis_dir(),
        ));
        match registry.reload() {
            Ok(summary) => log::info!("capabilities loaded: {}", summary.total()),
            Err(e) => log::error!("capability reload failed: {e}"),
        }

        let catalog = Arc::new(SkillCatalog::new(settings.skills_dir()));
        match catalog.reload() {
            Ok(count) => log::info!("skills loaded: {count}"),
            Err(e) => log::error!("skill reload failed: {e}"),
        }

        let inventory_path = settings.agent_dir.join("inventory.json");
        let inventory = if inventory_path.exists() {
            StaticInventory::from_file(&inventory_path)
                .with_context(|| format!("loading {}", inventory_path.display()))?
        } else {
            log::warn!(
                "no inventory.json under {}; the device set is empty",
                settings.agent_dir.display()
            );
            StaticInventory::default()
        };

        // Real SSH/NETCONF transports are wired by embedders; the replay
        // transport is available for lab runs.
        let transport: Arc<dyn DeviceTransport> =
            match std::env::var("OLAV_TRANSPORT").as_deref() {
                Ok("replay") => Arc::new(ReplayTransport::new().respond_default("ok")),
                _ => Arc::new(UnconfiguredTransport),
            };

        let audit = Arc::new(JsonlAuditSink::spawn(
            settings.audit_file_path(),
            settings.persistence.audit_queue_depth,
        ));

        let engine = Arc::new(FleetEngine::new(
            Arc::clone(&registry),
            Arc::new(inventory),
            transport,
            Arc::new(EnvCredentialProvider),
            Arc::new(NoTemplates),
            audit,
            &settings,
        ));

        let index = Arc::new(SearchIndex::new(
            settings.agent_dir.clone(),
            settings.search.clone(),
            None,
            None,
        ));
        match index.rebuild().await {
            Ok(count) => log::info!("knowledge index built: {count} documents"),
            Err(e) => log::error!("knowledge index build failed: {e}"),
        }
        let store = KnowledgeStore::new(settings.agent_dir.clone(), index);

        let runner = Arc::new(InspectionRunner::new(
            Arc::clone(&engine),
            Some(Arc::clone(&store)),
            &settings,
        ));

        let tools: ToolRegistry = standard_registry(
            Arc::clone(&registry),
            Arc::clone(&engine),
            Arc::clone(&catalog),
            runner,
            Arc::clone(&store),
        );

        let threads = SqliteThreadStore::connect(settings.thread_db_path()).await?;
        let manager = Arc::new(SessionManager::new(Arc::new(threads), Arc::new(tools)));

        Ok(Self {
            settings,
            registry,
            catalog,
            engine,
            store,
            manager,
        })
    }
}
