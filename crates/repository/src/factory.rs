//! Memoizing repository construction, one instance per (connection, entity kind).
//!
//! Lookups are keyed by an explicit [`CacheKey`]: the connection's
//! host/database identity, the entity kind's name and the concrete repository
//! type. Construction holds a per-key build guard, never the cache lock, so
//! concurrent first lookups for the same key still materialize a single
//! instance while a custom constructor may itself call back into the factory.
//! A failed construction leaves the cache untouched.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use crate::connection::{Connection, ConnectionIdentity};
use crate::entity::EntityKind;
use crate::error::RepositoryError;
use crate::repository::Repository;

/// A caller-defined repository built on top of [`Repository`].
///
/// Deref to the base repository exposes every standard operation; the type
/// adds its own on top. `Args` carries whatever extra state the constructor
/// needs.
///
/// ```ignore
/// struct UserRepository {
///     base: Repository<User, SqlConnection>,
///     page_size: usize,
/// }
///
/// impl Deref for UserRepository {
///     type Target = Repository<User, SqlConnection>;
///     fn deref(&self) -> &Self::Target { &self.base }
/// }
///
/// impl CustomRepository<User, SqlConnection> for UserRepository {
///     type Args = usize;
///     fn from_base(base: Repository<User, SqlConnection>, page_size: usize) -> Result<Self, RepositoryError> {
///         Ok(Self { base, page_size })
///     }
/// }
/// ```
#[diagnostic::on_unimplemented(
    message = "custom repository `{Self}` must inherit from Repository",
    note = "implement `CustomRepository` and `Deref<Target = Repository<K, C>>` for it"
)]
pub trait CustomRepository<K: EntityKind, C: Connection>:
    Deref<Target = Repository<K, C>> + Send + Sync + Sized + 'static
{
    type Args;

    fn from_base(base: Repository<K, C>, args: Self::Args) -> Result<Self, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    connection: ConnectionIdentity,
    entity: &'static str,
    repository: TypeId,
}

impl CacheKey {
    fn new<K: EntityKind, R: 'static>(connection: ConnectionIdentity) -> Self {
        Self {
            connection,
            entity: K::NAME,
            repository: TypeId::of::<R>(),
        }
    }
}

type Entry = Arc<dyn Any + Send + Sync>;
type BuildGuard = Arc<Mutex<()>>;

/// Memoizing repository constructor.
#[derive(Default)]
pub struct RepositoryFactory {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    building: Mutex<HashMap<CacheKey, BuildGuard>>,
}

impl RepositoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The repository for `K` on `connection`, built on first use.
    ///
    /// Repeated calls with a connection of the same identity return the same
    /// instance.
    pub fn get_repository<K, C>(&self, connection: &C) -> Result<Arc<Repository<K, C>>, RepositoryError>
    where
        K: EntityKind,
        C: Connection,
    {
        let key = CacheKey::new::<K, Repository<K, C>>(connection.identity());
        self.get_or_try_insert(key, || Repository::new(connection.clone()))
    }

    /// A custom repository `R` for `K` on `connection`, built on first use.
    ///
    /// `args` reach [`CustomRepository::from_base`] only when the instance is
    /// constructed; on a cache hit they are dropped.
    pub fn get_custom_repository<R, K, C>(&self, connection: &C, args: R::Args) -> Result<Arc<R>, RepositoryError>
    where
        R: CustomRepository<K, C>,
        K: EntityKind,
        C: Connection,
    {
        let key = CacheKey::new::<K, R>(connection.identity());
        self.get_or_try_insert(key, || {
            let base = Repository::new(connection.clone())?;
            R::from_base(base, args)
        })
    }

    /// Number of cached repositories.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every cached repository.
    pub fn clear(&self) {
        self.lock().clear();
        recover(self.building.lock()).clear();
    }

    fn get_or_try_insert<T, F>(&self, key: CacheKey, build: F) -> Result<Arc<T>, RepositoryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, RepositoryError>,
    {
        if let Some(hit) = self.cached::<T>(&key) {
            return hit;
        }

        let guard = Arc::clone(recover(self.building.lock()).entry(key.clone()).or_default());
        let _building = recover(guard.lock());

        // Another caller may have finished while we waited for the guard.
        if let Some(hit) = self.cached::<T>(&key) {
            return hit;
        }

        let instance = Arc::new(build()?);
        debug!(
            connection = %key.connection,
            entity = key.entity,
            repository = type_name::<T>(),
            "repository cached"
        );
        self.lock().insert(key, Arc::clone(&instance) as Entry);
        Ok(instance)
    }

    fn cached<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<Result<Arc<T>, RepositoryError>> {
        let entry = Arc::clone(self.lock().get(key)?);
        Some(entry.downcast::<T>().map_err(|_| {
            RepositoryError::Configuration(format!(
                "cached repository for {}/{} is not a {}",
                key.connection,
                key.entity,
                type_name::<T>()
            ))
        }))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        recover(self.entries.lock())
    }
}

/// Entries are inserted fully built, so a poisoned map is still consistent.
fn recover<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("cached", &self.len())
            .finish()
    }
}

/// The process-wide factory used by [`get_repository`] and
/// [`get_custom_repository`].
pub fn global() -> &'static RepositoryFactory {
    static GLOBAL: OnceLock<RepositoryFactory> = OnceLock::new();
    GLOBAL.get_or_init(RepositoryFactory::new)
}

/// Repository singleton for `K` on `connection` from the [`global`] factory.
pub fn get_repository<K, C>(connection: &C) -> Result<Arc<Repository<K, C>>, RepositoryError>
where
    K: EntityKind,
    C: Connection,
{
    global().get_repository::<K, C>(connection)
}

/// Custom repository singleton from the [`global`] factory.
pub fn get_custom_repository<R, K, C>(connection: &C, args: R::Args) -> Result<Arc<R>, RepositoryError>
where
    R: CustomRepository<K, C>,
    K: EntityKind,
    C: Connection,
{
    global().get_custom_repository::<R, K, C>(connection, args)
}
