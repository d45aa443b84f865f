//! Queries against the channel server built on the gateway and the pager.

use std::sync::Arc;

use {
    pusher_protocol::{
        Iq, Query, conditions, ns,
        pubsub::{
            Affiliation, AffiliationsPage, AffiliationsQuery, Item, ItemsPage, ItemsQuery, RsmSet,
            roles,
        },
    },
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    gateway::IqGateway,
    pagination::{Page, collect_pages},
};

#[derive(Clone)]
pub struct PubsubClient {
    gateway: Arc<IqGateway>,
    channel_server: String,
}

impl PubsubClient {
    pub fn new(gateway: Arc<IqGateway>, channel_server: impl Into<String>) -> Self {
        Self {
            gateway,
            channel_server: channel_server.into(),
        }
    }

    pub fn channel_server(&self) -> &str {
        &self.channel_server
    }

    pub fn gateway(&self) -> &Arc<IqGateway> {
        &self.gateway
    }

    /// Every affiliation of `node`, across all pages, in server order.
    pub async fn fetch_all(&self, node: &str) -> Result<Vec<Affiliation>> {
        let affiliations = collect_pages(
            &self.gateway,
            |cursor| self.affiliations_request(node, cursor),
            parse_affiliations_page,
        )
        .await?;
        debug!(node, count = affiliations.len(), "fetched affiliations");
        Ok(affiliations)
    }

    /// Affiliations of `node` whose role is one of `wanted`, order preserved.
    pub async fn fetch_by_roles(&self, node: &str, wanted: &[&str]) -> Result<Vec<Affiliation>> {
        let mut affiliations = self.fetch_all(node).await?;
        affiliations.retain(|a| wanted.contains(&a.affiliation.as_str()));
        Ok(affiliations)
    }

    pub async fn owners(&self, node: &str) -> Result<Vec<Affiliation>> {
        self.fetch_by_roles(node, &[roles::OWNER]).await
    }

    pub async fn owners_and_moderators(&self, node: &str) -> Result<Vec<Affiliation>> {
        self.fetch_by_roles(node, &[roles::OWNER, roles::MODERATOR])
            .await
    }

    /// One item of `node` by id. `None` if the server does not have it.
    pub async fn single_item(&self, node: &str, item_id: &str) -> Result<Option<Item>> {
        let request = ItemsQuery {
            node: node.to_string(),
            item_ids: vec![item_id.to_string()],
        };
        let iq = Iq::get(&self.channel_server, Query::from_payload(ns::PUBSUB, &request)?);

        let payload = match self.gateway.query(iq).await {
            Ok(payload) => payload,
            Err(Error::Remote(e)) if e.condition == conditions::ITEM_NOT_FOUND => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(payload) = payload else {
            return Ok(None);
        };
        let page: ItemsPage = payload.parse()?;
        Ok(page.items.into_iter().find(|item| item.id == item_id))
    }

    fn affiliations_request(&self, node: &str, cursor: Option<&str>) -> Result<Iq> {
        let query = AffiliationsQuery {
            node: node.to_string(),
            set: cursor.map(RsmSet::after),
        };
        Ok(Iq::get(
            &self.channel_server,
            Query::from_payload(ns::PUBSUB_OWNER, &query)?,
        ))
    }
}

/// A reply without a result set block is the last page.
fn parse_affiliations_page(payload: Option<Query>) -> Result<Page<Affiliation>> {
    let payload = payload.ok_or_else(|| Error::malformed("affiliations reply has no payload"))?;
    let page: AffiliationsPage = payload.parse()?;
    let cursor = page.cursor().map(str::to_string);
    Ok(Page::new(page.affiliations, cursor))
}
