//! Namespaces core.
//!
//! Namespaces are the unit of tenancy inside an account: every lock,
//! semaphore, and wait group lives in exactly one. This core owns the
//! namespace rows and the per-account counter; deleting a namespace does not
//! touch child entities — the gateway fans out GC enqueues to the three child
//! cores using the deleted namespace's [`NamespaceTimestampedId`].

use std::io::Read;
use std::io::Write;

use rook_store::CompositeKeyTable;
use rook_store::KeyRange;
use rook_store::PaginationToken;
use rook_store::SimpleKeyTable;
use rook_store::Store;
use rook_store::StoreError;
use rook_store::StoreRead;
use rook_store::keys::KeyBuf;
use rook_store::snapshot;
use serde::Deserialize;
use serde::Serialize;

use crate::ShardCore;
use crate::error::CoreError;
use crate::sharding::shard_by_account;
use crate::tables;
use crate::types::NamespaceTimestampedId;
use crate::types::clamped_limit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceId {
    pub account_id: u64,
    pub namespace_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: NamespaceId,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Namespace {
    /// The parent key child entities are addressed by.
    pub fn timestamped_id(&self) -> NamespaceTimestampedId {
        NamespaceTimestampedId {
            account_id: self.id.account_id,
            namespace_name: self.id.namespace_name.clone(),
            namespace_created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespacesCounter {
    pub number_of_namespaces: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNamespaceRequest {
    pub account_id: u64,
    pub name: String,
    pub description: String,
    pub now: i64,
    pub max_number_of_namespaces: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNamespaceResponse {
    pub namespace: Namespace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetNamespaceRequest {
    pub namespace_id: NamespaceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetNamespaceResponse {
    pub namespace: Namespace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNamespaceRequest {
    pub namespace_id: NamespaceId,
    pub description: String,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNamespaceResponse {
    pub namespace: Namespace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNamespaceRequest {
    pub namespace_id: NamespaceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNamespaceResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListNamespacesRequest {
    pub account_id: u64,
    pub pagination_token: Option<PaginationToken>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListNamespacesResponse {
    pub namespaces: Vec<Namespace>,
    pub next_pagination_token: Option<PaginationToken>,
    pub previous_pagination_token: Option<PaginationToken>,
}

/// State machine for namespace CRUD on one shard.
pub struct NamespacesCore {
    store: Store,

    namespaces_table: CompositeKeyTable<Namespace>,
    counters_table: SimpleKeyTable<NamespacesCounter>,
}

impl NamespacesCore {
    pub fn new(store: Store, shard_lower_bound: &[u8], shard_upper_bound: &[u8]) -> NamespacesCore {
        NamespacesCore {
            store,
            namespaces_table: CompositeKeyTable::new(tables::NAMESPACES, shard_lower_bound, shard_upper_bound),
            counters_table: SimpleKeyTable::new(
                tables::NAMESPACES_COUNTERS,
                shard_lower_bound,
                shard_upper_bound,
            ),
        }
    }

    pub fn create_namespace(
        &self,
        request: CreateNamespaceRequest,
    ) -> Result<CreateNamespaceResponse, CoreError> {
        let mut txn = self.store.update()?;

        if request.name.is_empty() {
            return Err(CoreError::invalid_argument("name should not be empty", &[]));
        }

        let mut counters = self.get_counters(&txn, request.account_id)?;

        let namespace_id =
            NamespaceId { account_id: request.account_id, namespace_name: request.name.clone() };

        match self.load_namespace(&txn, &namespace_id) {
            Ok(_) => {
                return Err(CoreError::already_exists(
                    "namespace with this name already exists",
                    &[("namespace_name", &request.name)],
                ));
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        if counters.number_of_namespaces >= request.max_number_of_namespaces {
            return Err(CoreError::resource_exhausted(
                "max number of namespaces reached",
                &[("limit", &request.max_number_of_namespaces.to_string())],
            ));
        }

        let namespace = Namespace {
            id: namespace_id,
            description: request.description,
            created_at: request.now,
            updated_at: request.now,
        };

        self.set_namespace(&mut txn, &namespace)?;

        counters.number_of_namespaces += 1;
        self.set_counters(&mut txn, request.account_id, &counters)?;

        txn.commit()?;

        Ok(CreateNamespaceResponse { namespace })
    }

    pub fn get_namespace(
        &self,
        request: GetNamespaceRequest,
    ) -> Result<GetNamespaceResponse, CoreError> {
        let txn = self.store.view()?;

        match self.load_namespace(&txn, &request.namespace_id) {
            Ok(namespace) => Ok(GetNamespaceResponse { namespace }),
            Err(StoreError::NotFound) => Err(CoreError::not_found(
                "namespace not found",
                &[("namespace_name", &request.namespace_id.namespace_name)],
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub fn update_namespace(
        &self,
        request: UpdateNamespaceRequest,
    ) -> Result<UpdateNamespaceResponse, CoreError> {
        let mut txn = self.store.update()?;

        let mut namespace = match self.load_namespace(&txn, &request.namespace_id) {
            Ok(namespace) => namespace,
            Err(StoreError::NotFound) => {
                return Err(CoreError::not_found(
                    "namespace not found",
                    &[("namespace_name", &request.namespace_id.namespace_name)],
                ));
            }
            Err(err) => return Err(err.into()),
        };

        // `created_at` is immutable: it discriminates the namespace's child
        // entities.
        namespace.description = request.description;
        namespace.updated_at = request.now;

        self.set_namespace(&mut txn, &namespace)?;
        txn.commit()?;

        Ok(UpdateNamespaceResponse { namespace })
    }

    /// Idempotent: deleting an absent namespace succeeds with no change.
    ///
    /// Child entities are not touched here; the gateway enqueues GC records
    /// in the locks, semaphores, and wait-groups cores.
    pub fn delete_namespace(
        &self,
        request: DeleteNamespaceRequest,
    ) -> Result<DeleteNamespaceResponse, CoreError> {
        let mut txn = self.store.update()?;

        let namespace = match self.load_namespace(&txn, &request.namespace_id) {
            Ok(namespace) => namespace,
            Err(StoreError::NotFound) => return Ok(DeleteNamespaceResponse),
            Err(err) => return Err(err.into()),
        };

        let mut counters = self.get_counters(&txn, request.namespace_id.account_id)?;

        let pk = namespaces_table_pk(namespace.id.account_id);
        let sk = namespaces_table_sk(&namespace.id.namespace_name);
        self.namespaces_table.delete(&mut txn, &pk, &sk)?;

        counters.number_of_namespaces -= 1;
        self.set_counters(&mut txn, request.namespace_id.account_id, &counters)?;

        txn.commit()?;

        Ok(DeleteNamespaceResponse)
    }

    pub fn list_namespaces(
        &self,
        request: ListNamespacesRequest,
    ) -> Result<ListNamespacesResponse, CoreError> {
        let txn = self.store.view()?;

        let page = self.namespaces_table.list_paginated(
            &txn,
            &namespaces_table_pk(request.account_id),
            request.pagination_token.as_ref(),
            clamped_limit(request.limit),
        )?;

        Ok(ListNamespacesResponse {
            namespaces: page.items,
            next_pagination_token: page.next,
            previous_pagination_token: page.previous,
        })
    }

    fn load_namespace(
        &self,
        txn: &impl StoreRead,
        namespace_id: &NamespaceId,
    ) -> Result<Namespace, StoreError> {
        self.namespaces_table.get(
            txn,
            &namespaces_table_pk(namespace_id.account_id),
            &namespaces_table_sk(&namespace_id.namespace_name),
        )
    }

    fn set_namespace(
        &self,
        txn: &mut rook_store::RwTxn,
        namespace: &Namespace,
    ) -> Result<(), StoreError> {
        self.namespaces_table.set(
            txn,
            &namespaces_table_pk(namespace.id.account_id),
            &namespaces_table_sk(&namespace.id.namespace_name),
            namespace,
        )
    }

    fn get_counters(
        &self,
        txn: &impl StoreRead,
        account_id: u64,
    ) -> Result<NamespacesCounter, StoreError> {
        match self.counters_table.get(txn, &namespaces_counters_table_pk(account_id)) {
            Ok(counters) => Ok(counters),
            Err(StoreError::NotFound) => Ok(NamespacesCounter::default()),
            Err(err) => Err(err),
        }
    }

    fn set_counters(
        &self,
        txn: &mut rook_store::RwTxn,
        account_id: u64,
        counters: &NamespacesCounter,
    ) -> Result<(), StoreError> {
        self.counters_table.set(txn, &namespaces_counters_table_pk(account_id), counters)
    }
}

impl ShardCore for NamespacesCore {
    fn ranges(&self) -> Vec<KeyRange> {
        vec![self.namespaces_table.table_key_range(), self.counters_table.table_key_range()]
    }

    fn snapshot(&self, writer: &mut dyn Write) -> Result<(), CoreError> {
        Ok(snapshot::export(&self.store, &self.ranges(), writer)?)
    }

    fn restore(&self, reader: &mut dyn Read) -> Result<(), CoreError> {
        Ok(snapshot::restore(&self.store, &self.ranges(), reader)?)
    }
}

// 1. shard key (by account id)
// 2. account id
fn namespaces_table_pk(account_id: u64) -> Vec<u8> {
    KeyBuf::new().raw(&shard_by_account(account_id)).u64(account_id).build()
}

// 1. namespace name
fn namespaces_table_sk(namespace_name: &str) -> Vec<u8> {
    KeyBuf::new().str(namespace_name).build()
}

// 1. shard key (by account id)
// 2. account id
fn namespaces_counters_table_pk(account_id: u64) -> Vec<u8> {
    KeyBuf::new().raw(&shard_by_account(account_id)).u64(account_id).build()
}
