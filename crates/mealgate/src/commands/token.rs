//! `mealgate token`: issue and inspect card payloads.

use chrono::{DateTime, Utc};
use serde::Serialize;

use mealgate_core::{CardToken, EntityId, ScanPayload, token};

use crate::cli::{GlobalOpts, TokenArgs, TokenCommand};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncodedView {
    card_id: EntityId,
    restaurant_id: EntityId,
    payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecodedView {
    kind: &'static str,
    card_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    guest_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restaurant_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    meal_window_ids: Vec<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_usage: Option<u32>,
}

impl From<ScanPayload> for DecodedView {
    fn from(payload: ScanPayload) -> Self {
        match payload {
            ScanPayload::LegacyBareId { id, .. } => Self {
                kind: "bare-id",
                card_id: id,
                guest_id: None,
                restaurant_id: None,
                meal_window_ids: Vec::new(),
                valid_from: None,
                valid_to: None,
                max_usage: None,
            },
            ScanPayload::Structured(t) => Self {
                kind: "token",
                card_id: t.card_id,
                guest_id: Some(t.guest_id),
                restaurant_id: Some(t.restaurant_id),
                meal_window_ids: t.meal_window_ids.into_iter().collect(),
                valid_from: Some(t.valid_from),
                valid_to: Some(t.valid_to),
                max_usage: Some(t.max_usage),
            },
        }
    }
}

fn decoded_detail(v: &DecodedView) -> String {
    let windows = v
        .meal_window_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    output::detail_block(&[
        ("Kind", v.kind.to_owned()),
        ("Card", v.card_id.to_string()),
        ("Guest", opt(v.guest_id.as_ref())),
        ("Restaurant", opt(v.restaurant_id.as_ref())),
        ("Windows", windows),
        ("Valid from", util::fmt_time(v.valid_from.as_ref())),
        ("Valid to", util::fmt_time(v.valid_to.as_ref())),
        ("Max usage", opt(v.max_usage.as_ref())),
    ])
}

fn opt<T: ToString>(v: Option<&T>) -> String {
    v.map(ToString::to_string).unwrap_or_default()
}

pub async fn handle(args: TokenArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        TokenCommand::Encode { card, restaurant } => {
            let cfg = util::load_config(global)?;
            let repo = util::load_repository(global, &cfg, true).await?;

            let key = EntityId::from(card.as_str());
            let card = repo.card(&key).ok_or_else(|| CliError::NotFound {
                resource_type: "card".into(),
                identifier: key.to_string(),
                list_command: "config show".into(),
            })?;
            let restaurant_id = match restaurant {
                Some(r) => EntityId::from(r.as_str()),
                None => repo
                    .guest(&card.guest_id)
                    .map(|g| g.restaurant_id)
                    .ok_or_else(|| CliError::Validation {
                        field: "restaurant".into(),
                        reason: format!(
                            "guest {} of card {} is unknown; pass --restaurant",
                            card.guest_id, card.id
                        ),
                    })?,
            };

            let issued = CardToken::issue(CardToken::claims_for(&card, restaurant_id.clone()));
            let view = EncodedView {
                card_id: card.id,
                restaurant_id,
                payload: token::encode(&issued)?,
            };
            let out = output::render_single(
                &global.output,
                &view,
                |v| v.payload.clone(),
                |v| v.payload.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        TokenCommand::Decode { raw } => {
            let payload = token::decode(&raw).map_err(|e| CliError::Validation {
                field: "payload".into(),
                reason: e.to_string(),
            })?;
            let view = DecodedView::from(payload);
            let out = output::render_single(&global.output, &view, decoded_detail, |v| {
                v.card_id.to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
