//! Shared-IP account resolver
//!
//! Accounts and IP addresses form an implicit bipartite graph: an edge
//! exists wherever an event records an account on an address. Resolution is
//! connected-component discovery over that graph, answering "which accounts
//! and addresses are reachable from this one, directly or transitively".

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;

/// Full connected component reachable from a seed account.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub accounts: Vec<i64>,
    pub searched_ips: Vec<String>,
}

/// Single-hop lookup: every IP one account has connected from.
#[derive(Debug, Clone, Serialize)]
pub struct AccountIps {
    pub acctid: i64,
    pub ip: Vec<String>,
}

/// Single-hop lookup: every account seen on one IP.
#[derive(Debug, Clone, Serialize)]
pub struct IpAccounts {
    pub ip: String,
    pub acctids: Vec<i64>,
}

enum Node {
    Account(i64),
    Ip(String),
}

pub struct Resolver {
    db: Database,
}

impl Resolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Worklist BFS over the account↔IP relation. Each node is expanded at
    /// most once, so the traversal issues O(accounts + IPs) store queries
    /// and terminates on any finite event set, cycles included.
    pub async fn resolve(&self, seed: i64) -> Result<Resolution> {
        let mut seen_accounts: HashSet<i64> = HashSet::new();
        let mut seen_ips: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<Node> = VecDeque::new();

        seen_accounts.insert(seed);
        frontier.push_back(Node::Account(seed));

        while let Some(node) = frontier.pop_front() {
            match node {
                Node::Account(acctid) => {
                    for ip in self.db.ips_by_account(acctid).await? {
                        if seen_ips.insert(ip.clone()) {
                            debug!("Discovered IP {} via account {}", ip, acctid);
                            frontier.push_back(Node::Ip(ip));
                        }
                    }
                }
                Node::Ip(ip) => {
                    for event in self.db.events_by_ip(&ip).await? {
                        if let Some(acctid) = event.acctid {
                            if seen_accounts.insert(acctid) {
                                debug!("Discovered account {} via IP {}", acctid, ip);
                                frontier.push_back(Node::Account(acctid));
                            }
                        }
                        // Normally self-referential, but an event row can
                        // carry a differing recorded address
                        if event.ipaddr != ip && seen_ips.insert(event.ipaddr.clone()) {
                            frontier.push_back(Node::Ip(event.ipaddr));
                        }
                    }
                }
            }
        }

        let mut accounts: Vec<i64> = seen_accounts.into_iter().collect();
        accounts.sort_unstable();
        let mut searched_ips: Vec<String> = seen_ips.into_iter().collect();
        searched_ips.sort();

        Ok(Resolution {
            accounts,
            searched_ips,
        })
    }

    pub async fn ips_for_account(&self, acctid: i64) -> Result<AccountIps> {
        let mut ip = self.db.ips_by_account(acctid).await?;
        ip.sort();
        Ok(AccountIps { acctid, ip })
    }

    pub async fn accounts_for_ip(&self, ip: &str) -> Result<IpAccounts> {
        let mut acctids = self.db.accounts_by_ip(ip).await?;
        acctids.sort();
        Ok(IpAccounts {
            ip: ip.to_string(),
            acctids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnState, NewEvent};
    use chrono::{TimeZone, Utc};

    // Each edge gets a distinct timestamp so dedup never interferes
    async fn seed_edges(db: &Database, edges: &[(i64, &str)]) {
        for (i, (acctid, ip)) in edges.iter().enumerate() {
            db.upsert_user(*acctid).await.unwrap();
            db.insert_event(&NewEvent {
                acctid: Some(*acctid),
                state: ConnState::Connect,
                ipaddr: ip.to_string(),
                timestamp: Utc.with_ymd_and_hms(2020, 5, 17, 3, 20, 0).unwrap()
                    + chrono::Duration::seconds(i as i64),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn resolves_transitive_component() {
        let db = Database::open_in_memory().await.unwrap();
        seed_edges(
            &db,
            &[(12345, "127.0.0.1"), (54321, "127.0.0.1"), (54321, "10.0.0.2")],
        )
        .await;

        let resolution = Resolver::new(db).resolve(12345).await.unwrap();
        assert_eq!(resolution.accounts, vec![12345, 54321]);
        assert_eq!(resolution.searched_ips, vec!["10.0.0.2", "127.0.0.1"]);
    }

    #[tokio::test]
    async fn excludes_other_components() {
        let db = Database::open_in_memory().await.unwrap();
        seed_edges(
            &db,
            &[
                (1, "10.0.0.1"),
                (2, "10.0.0.1"),
                (2, "10.0.0.2"),
                (3, "10.0.0.2"),
                // Disjoint component
                (7, "192.168.0.1"),
                (8, "192.168.0.1"),
            ],
        )
        .await;

        let resolver = Resolver::new(db);
        let resolution = resolver.resolve(1).await.unwrap();
        assert_eq!(resolution.accounts, vec![1, 2, 3]);
        assert_eq!(resolution.searched_ips, vec!["10.0.0.1", "10.0.0.2"]);

        let other = resolver.resolve(7).await.unwrap();
        assert_eq!(other.accounts, vec![7, 8]);
        assert_eq!(other.searched_ips, vec!["192.168.0.1"]);
    }

    #[tokio::test]
    async fn result_is_symmetric_within_component() {
        let db = Database::open_in_memory().await.unwrap();
        seed_edges(
            &db,
            &[(1, "10.0.0.1"), (2, "10.0.0.1"), (2, "10.0.0.2"), (3, "10.0.0.2")],
        )
        .await;

        let resolver = Resolver::new(db);
        let from_first = resolver.resolve(1).await.unwrap();
        let from_last = resolver.resolve(3).await.unwrap();
        assert_eq!(from_first.accounts, from_last.accounts);
        assert_eq!(from_first.searched_ips, from_last.searched_ips);
    }

    #[tokio::test]
    async fn terminates_on_cycles() {
        let db = Database::open_in_memory().await.unwrap();
        // A ↔ IP1 ↔ B ↔ IP1 back to A, plus repeated sightings
        seed_edges(
            &db,
            &[(1, "10.0.0.1"), (2, "10.0.0.1"), (1, "10.0.0.1"), (2, "10.0.0.1")],
        )
        .await;

        let resolution = Resolver::new(db).resolve(1).await.unwrap();
        assert_eq!(resolution.accounts, vec![1, 2]);
        assert_eq!(resolution.searched_ips, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn unattributed_disconnects_contribute_no_accounts() {
        let db = Database::open_in_memory().await.unwrap();
        seed_edges(&db, &[(1, "10.0.0.1")]).await;
        db.insert_event(&NewEvent {
            acctid: None,
            state: ConnState::Disconnect,
            ipaddr: "10.0.0.1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2020, 5, 18, 0, 0, 0).unwrap(),
        })
        .await
        .unwrap();

        let resolution = Resolver::new(db).resolve(1).await.unwrap();
        assert_eq!(resolution.accounts, vec![1]);
        assert_eq!(resolution.searched_ips, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn seed_with_no_events_resolves_to_itself() {
        let db = Database::open_in_memory().await.unwrap();
        let resolution = Resolver::new(db).resolve(999).await.unwrap();
        assert_eq!(resolution.accounts, vec![999]);
        assert!(resolution.searched_ips.is_empty());
    }

    #[tokio::test]
    async fn single_hop_lookups_sorted() {
        let db = Database::open_in_memory().await.unwrap();
        seed_edges(
            &db,
            &[(5, "9.0.0.1"), (5, "10.0.0.1"), (6, "9.0.0.1"), (4, "9.0.0.1")],
        )
        .await;

        let resolver = Resolver::new(db);
        let by_account = resolver.ips_for_account(5).await.unwrap();
        assert_eq!(by_account.acctid, 5);
        assert_eq!(by_account.ip, vec!["10.0.0.1", "9.0.0.1"]);

        let by_ip = resolver.accounts_for_ip("9.0.0.1").await.unwrap();
        assert_eq!(by_ip.acctids, vec![4, 5, 6]);
    }
}
