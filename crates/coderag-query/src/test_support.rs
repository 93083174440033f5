//! Shared fixtures for the query crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use coderag_core::{
    Chunk, ChunkKind, Embedder, Entity, EntityKey, EntityKind, RagError, RelationKind,
    Relationship, Repository, Result, ScoredCandidate, Source, Store,
};
use coderag_embed::MockEmbedder;
use coderag_store::{SqliteStore, StoreOptions};

use crate::retrieval::{RetrievalRequest, Retriever};

pub(crate) const TEST_DIMENSION: usize = 8;

/// Query whose embedding equals the `StreamingResponse` doc chunk's.
pub(crate) const STREAMING_QUESTION: &str = "how does streaming response work";

/// Three repositories (`auth`, `web`, `billing`) with a small call graph:
///
/// ```text
/// web:LoginHandler --calls 0.9--> auth:UserService.validateCredentials
/// auth:UserService.validateCredentials --calls 0.8--> auth:TokenStore.refresh
/// auth:TokenStore.refresh --references 0.6--> auth:UserService.validateCredentials
/// auth:TokenStore.refresh --calls 0.4--> billing:InvoiceService
/// billing:InvoiceService --imports 0.75--> auth:UserService
/// auth:UserService --contains 1.0--> auth:UserService.validateCredentials
/// web:StreamingResponse.poll --references 0.7--> web:StreamingResponse
/// ```
pub(crate) async fn seeded_store(vectors: bool) -> Arc<SqliteStore> {
    let options = StoreOptions {
        vector_search: vectors,
        ..StoreOptions::with_dimension(TEST_DIMENSION)
    };
    let store = SqliteStore::open_memory(options).unwrap();
    let embedder = MockEmbedder::with_dimension(TEST_DIMENSION);

    store
        .insert_repository(Repository::new("auth", Some("Authentication service")))
        .await
        .unwrap();
    store
        .insert_repository(Repository::new("web", Some("Web frontend")))
        .await
        .unwrap();
    store
        .insert_repository(Repository::new("billing", None))
        .await
        .unwrap();

    let entities = vec![
        Entity::new("auth", "UserService", "UserService", EntityKind::Class)
            .with_file_path("src/user_service.ts"),
        Entity::new(
            "auth",
            "UserService.validateCredentials",
            "validateCredentials",
            EntityKind::Method,
        )
        .with_qualified_name("UserService.validateCredentials")
        .with_file_path("src/user_service.ts"),
        Entity::new("auth", "TokenStore", "TokenStore", EntityKind::Class)
            .with_file_path("src/token_store.ts"),
        Entity::new("auth", "TokenStore.refresh", "refresh", EntityKind::Method)
            .with_qualified_name("TokenStore.refresh")
            .with_file_path("src/token_store.ts"),
        Entity::new("web", "LoginHandler", "LoginHandler", EntityKind::Function)
            .with_file_path("src/login.ts"),
        Entity::new("web", "StreamingResponse", "StreamingResponse", EntityKind::Struct)
            .with_file_path("src/streaming.rs"),
        Entity::new("web", "StreamingResponse.poll", "poll", EntityKind::Method)
            .with_qualified_name("StreamingResponse.poll")
            .with_file_path("src/streaming.rs"),
        Entity::new("billing", "InvoiceService", "InvoiceService", EntityKind::Class)
            .with_file_path("src/invoice.py"),
    ];
    store.insert_entities(&entities).await.unwrap();

    let edge = |from: (&str, &str), to: (&str, &str), kind, strength| {
        Relationship::new(
            EntityKey::new(from.0, from.1),
            EntityKey::new(to.0, to.1),
            kind,
            strength,
        )
    };
    let relationships = vec![
        edge(
            ("web", "LoginHandler"),
            ("auth", "UserService.validateCredentials"),
            RelationKind::Calls,
            0.9,
        ),
        edge(
            ("auth", "UserService.validateCredentials"),
            ("auth", "TokenStore.refresh"),
            RelationKind::Calls,
            0.8,
        ),
        edge(
            ("auth", "TokenStore.refresh"),
            ("auth", "UserService.validateCredentials"),
            RelationKind::References,
            0.6,
        ),
        edge(
            ("auth", "TokenStore.refresh"),
            ("billing", "InvoiceService"),
            RelationKind::Calls,
            0.4,
        ),
        edge(
            ("billing", "InvoiceService"),
            ("auth", "UserService"),
            RelationKind::Imports,
            0.75,
        ),
        edge(
            ("web", "StreamingResponse.poll"),
            ("web", "StreamingResponse"),
            RelationKind::References,
            0.7,
        ),
        edge(
            ("auth", "UserService"),
            ("auth", "UserService.validateCredentials"),
            RelationKind::Contains,
            1.0,
        ),
    ];
    store.insert_relationships(&relationships).await.unwrap();

    let code = [
        (
            "auth",
            "UserService",
            "ts",
            1,
            12,
            "export class UserService {\n  constructor(private tokens: TokenStore) {}\n}",
        ),
        (
            "auth",
            "UserService.validateCredentials",
            "ts",
            4,
            10,
            "async validateCredentials(user: string, password: string): Promise<boolean> {\n  \
             const ok = await checkHash(user, password);\n  return ok && this.tokens.refresh(user);\n}",
        ),
        (
            "auth",
            "TokenStore",
            "ts",
            1,
            20,
            "export class TokenStore {\n  private cache = new Map<string, string>();\n}",
        ),
        (
            "auth",
            "TokenStore.refresh",
            "ts",
            8,
            15,
            "refresh(user: string): boolean {\n  invoices.recordLogin(user);\n  return true;\n}",
        ),
        (
            "web",
            "LoginHandler",
            "ts",
            1,
            9,
            "export async function LoginHandler(req: Request) {\n  \
             return userService.validateCredentials(req.user, req.password);\n}",
        ),
        (
            "web",
            "StreamingResponse",
            "rust",
            10,
            14,
            "pub struct StreamingResponse {\n    body: Body,\n}",
        ),
        (
            "web",
            "StreamingResponse.poll",
            "rust",
            16,
            24,
            "fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {\n    \
             self.body.poll_frame(cx)\n}",
        ),
        (
            "billing",
            "InvoiceService",
            "python",
            1,
            30,
            "class InvoiceService:\n    def record_login(self, user):\n        pass",
        ),
    ];

    let mut chunks: Vec<Chunk> = code
        .iter()
        .map(|(repo, id, language, start, end, content)| {
            let path = entities
                .iter()
                .find(|e| e.repo == *repo && e.entity_id == *id)
                .and_then(|e| e.file_path.clone())
                .unwrap_or_default();
            Chunk::new(repo, id, ChunkKind::Code, content)
                .with_span(&path, *start, *end)
                .with_language(language)
                .with_embedding(embedder.embed(content))
        })
        .collect();

    chunks.push(
        Chunk::new(
            "web",
            "StreamingResponse",
            ChunkKind::Doc,
            "Streams an HTTP response body to the client frame by frame.",
        )
        .with_embedding(embedder.embed(STREAMING_QUESTION)),
    );

    store.batch_insert_chunks(&chunks).await.unwrap();

    Arc::new(store)
}

/// Embedder that answers after a fixed delay.
pub(crate) struct SlowEmbedder(pub Duration);

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.0).await;
        Ok(MockEmbedder::with_dimension(TEST_DIMENSION).embed(text))
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }
}

/// What a [`ScriptedRetriever`] does when called.
#[derive(Clone)]
pub(crate) enum Script {
    Return(Vec<ScoredCandidate>),
    Fail(String),
    Unavailable,
    Sleep(Duration),
    Panic,
}

/// Retriever double with a fixed behaviour and a call counter.
pub(crate) struct ScriptedRetriever {
    source: Source,
    script: Script,
    pub calls: AtomicUsize,
}

impl ScriptedRetriever {
    pub fn new(source: Source, script: Script) -> Arc<Self> {
        Arc::new(Self {
            source,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    fn source(&self) -> Source {
        self.source
    }

    async fn retrieve(&self, _request: &RetrievalRequest) -> Result<Vec<ScoredCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Return(candidates) => Ok(candidates.clone()),
            Script::Fail(message) => Err(RagError::database(message.clone())),
            Script::Unavailable => Err(RagError::capability_unavailable("scripted")),
            Script::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Vec::new())
            }
            Script::Panic => panic!("scripted retriever panicked"),
        }
    }
}

/// A candidate for a chunk that need not exist in any store.
pub(crate) fn candidate(chunk_id: &str, repo: &str, score: f32, source: Source) -> ScoredCandidate {
    ScoredCandidate::new(
        Chunk::with_id(chunk_id, repo, ChunkKind::Code, &format!("content of {}", chunk_id)),
        score,
        source,
    )
}
