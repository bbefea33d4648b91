//! Product remediation sub-steps.
//!
//! Each step re-reads the product right before writing and skips the write
//! when the product already matches its target.

use async_trait::async_trait;
use remedy_core::action::{RemediationAction, StepContext, StepError, StepOutcome, SubStep};
use remedy_core::api::WorkItem;
use remedy_core::config::RemediationConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{MetafieldKeys, ShopClient, ShopMutation};
use crate::color;
use crate::types::{metafield_key, same_amount, ProductPayload, VariantPayload};

pub const SWAP_LEAD_IMAGE: &str = "swap-lead-image";
pub const PRICE_FROM_COST: &str = "price-from-cost";
pub const COST_METAFIELD: &str = "cost-metafield";
pub const TRANSLATE_COLOR: &str = "translate-color";

/// Metafield type used for cost-derived values.
const DECIMAL_TYPE: &str = "number_decimal";

/// Build the product action from the enabled remediation settings, in a
/// fixed order: lead image, price, cost metafield, color.
pub fn product_action(config: &RemediationConfig) -> RemediationAction<ShopClient> {
    let mut action = RemediationAction::new(format!("products:{}", config.vendor));
    if config.swap_lead_images {
        action.push(Box::new(SwapLeadImage));
    }
    if let Some(multiplier) = config.price_multiplier {
        action.push(Box::new(PriceFromCost::new(multiplier)));
    }
    if let Some(mf) = &config.cost_metafield {
        action.push(Box::new(CostMetafield::new(&mf.namespace, &mf.key, mf.multiplier)));
    }
    if let Some(c) = &config.color_metafield {
        action.push(Box::new(TranslateColorMetafield::new(
            &c.namespace,
            &c.key,
            &c.fallback,
        )));
    }
    action
}

/// Metafields the enabled steps read, for [`ShopClient::with_metafields`].
pub fn metafield_keys(config: &RemediationConfig) -> MetafieldKeys {
    MetafieldKeys {
        product: config
            .color_metafield
            .iter()
            .map(|c| metafield_key(&c.namespace, &c.key))
            .collect(),
        variant: config
            .cost_metafield
            .iter()
            .map(|m| metafield_key(&m.namespace, &m.key))
            .collect(),
    }
}

fn decode_target<T: DeserializeOwned>(step: &str, target: &Value) -> Result<T, StepError> {
    serde_json::from_value(target.clone())
        .map_err(|e| StepError::Invalid(format!("{step}: unreadable target: {e}")))
}

fn encode_target<T: Serialize>(target: &T) -> Result<Option<Value>, StepError> {
    serde_json::to_value(target)
        .map(Some)
        .map_err(|e| StepError::Invalid(format!("cannot encode target: {e}")))
}

fn variant_of(payload: &ProductPayload) -> Result<&VariantPayload, StepError> {
    payload
        .variant
        .as_ref()
        .ok_or_else(|| StepError::Invalid(format!("product {} has no variant", payload.product_id)))
}

async fn current(cx: &mut StepContext<'_, ShopClient>, item: &WorkItem) -> Result<ProductPayload, StepError> {
    let fresh = cx.fetch(&item.id).await?;
    ProductPayload::from_item(&fresh)
}

/// `unit cost × multiplier` at two decimals, or `None` without a usable cost.
fn cost_based(payload: &ProductPayload, multiplier: f64) -> Option<(&VariantPayload, String)> {
    let variant = payload.variant.as_ref()?;
    let cost = variant.unit_cost()?;
    Some((variant, format!("{:.2}", cost * multiplier)))
}

// ---------------------------------------------------------------------------
// SwapLeadImage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LeadImageTarget {
    lead_image_id: u64,
    previous_lead_id: u64,
}

/// Promote the product's second image to lead image.
///
/// "The second image" changes once the swap is made, so the target is
/// pinned on first computation and reused on every later run.
pub struct SwapLeadImage;

#[async_trait]
impl SubStep<ShopClient> for SwapLeadImage {
    fn name(&self) -> &str {
        SWAP_LEAD_IMAGE
    }

    fn target(&self, item: &WorkItem, pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        if let Some(pinned) = pinned {
            return Ok(Some(pinned.clone()));
        }
        let payload = ProductPayload::from_item(item)?;
        match payload.image_ids.as_slice() {
            [first, second, ..] => encode_target(&LeadImageTarget {
                lead_image_id: *second,
                previous_lead_id: *first,
            }),
            _ => Ok(None),
        }
    }

    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, ShopClient>,
    ) -> Result<StepOutcome, StepError> {
        let target: LeadImageTarget = decode_target(SWAP_LEAD_IMAGE, target)?;
        let product = current(cx, item).await?;

        if product.image_ids.first() == Some(&target.lead_image_id) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        if !product.image_ids.contains(&target.lead_image_id) {
            return Err(StepError::Invalid(format!(
                "image {} is no longer attached to product {}",
                target.lead_image_id, product.product_id
            )));
        }

        let detail = format!(
            "lead image {} -> {}",
            product.image_ids.first().map_or_else(|| "none".to_string(), u64::to_string),
            target.lead_image_id
        );
        if cx.dry_run() {
            return Ok(StepOutcome::WouldApply { detail });
        }
        let mutation = ShopMutation::SetImagePosition {
            product_id: product.product_id,
            image_id: target.lead_image_id,
            position: 1,
        };
        cx.mutate(mutation.name(), &mutation).await?;
        tracing::info!(product = product.product_id, image = target.lead_image_id, "lead image swapped");
        Ok(StepOutcome::Applied { detail })
    }
}

// ---------------------------------------------------------------------------
// PriceFromCost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PriceTarget {
    variant_id: u64,
    price: String,
}

/// Set the first variant's price to `unit cost × multiplier`.
pub struct PriceFromCost {
    multiplier: f64,
}

impl PriceFromCost {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

#[async_trait]
impl SubStep<ShopClient> for PriceFromCost {
    fn name(&self) -> &str {
        PRICE_FROM_COST
    }

    fn target(&self, item: &WorkItem, _pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        let payload = ProductPayload::from_item(item)?;
        match cost_based(&payload, self.multiplier) {
            Some((variant, price)) => encode_target(&PriceTarget {
                variant_id: variant.id,
                price,
            }),
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, ShopClient>,
    ) -> Result<StepOutcome, StepError> {
        let target: PriceTarget = decode_target(PRICE_FROM_COST, target)?;
        let product = current(cx, item).await?;
        let variant = variant_of(&product)?;

        if same_amount(&variant.price, &target.price) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let detail = format!("price {} -> {}", variant.price, target.price);
        if cx.dry_run() {
            return Ok(StepOutcome::WouldApply { detail });
        }
        let mutation = ShopMutation::SetVariantPrice {
            variant_id: target.variant_id,
            price: target.price.clone(),
        };
        cx.mutate(mutation.name(), &mutation).await?;
        tracing::info!(variant = target.variant_id, price = %target.price, "price updated");
        Ok(StepOutcome::Applied { detail })
    }
}

// ---------------------------------------------------------------------------
// CostMetafield
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MetafieldTarget {
    owner_gid: String,
    value: String,
}

/// Write `unit cost × multiplier` into a variant metafield.
pub struct CostMetafield {
    namespace: String,
    key: String,
    multiplier: f64,
}

impl CostMetafield {
    pub fn new(namespace: &str, key: &str, multiplier: f64) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            multiplier,
        }
    }
}

#[async_trait]
impl SubStep<ShopClient> for CostMetafield {
    fn name(&self) -> &str {
        COST_METAFIELD
    }

    fn target(&self, item: &WorkItem, _pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        let payload = ProductPayload::from_item(item)?;
        match cost_based(&payload, self.multiplier) {
            Some((variant, value)) => encode_target(&MetafieldTarget {
                owner_gid: variant.gid.clone(),
                value,
            }),
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, ShopClient>,
    ) -> Result<StepOutcome, StepError> {
        let target: MetafieldTarget = decode_target(COST_METAFIELD, target)?;
        let product = current(cx, item).await?;
        let variant = variant_of(&product)?;

        let existing = variant.metafield(&self.namespace, &self.key);
        if existing.is_some_and(|v| same_amount(v, &target.value)) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let detail = format!(
            "{}.{} {} -> {}",
            self.namespace,
            self.key,
            existing.unwrap_or("unset"),
            target.value
        );
        if cx.dry_run() {
            return Ok(StepOutcome::WouldApply { detail });
        }
        let mutation = ShopMutation::SetMetafield {
            owner_gid: target.owner_gid.clone(),
            namespace: self.namespace.clone(),
            key: self.key.clone(),
            value: target.value.clone(),
            kind: DECIMAL_TYPE.to_string(),
        };
        cx.mutate(mutation.name(), &mutation).await?;
        Ok(StepOutcome::Applied { detail })
    }
}

// ---------------------------------------------------------------------------
// TranslateColorMetafield
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ColorTarget {
    owner_gid: String,
    kind: String,
    value: String,
    /// Value before the first write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original: Option<String>,
}

/// Translate a product color metafield to a Danish palette color.
///
/// Missing or unrecognised values take the color named in the product
/// title, variant options or variant title, in that order, else the
/// fallback. The pinned target keeps the original value as a backup.
pub struct TranslateColorMetafield {
    namespace: String,
    key: String,
    fallback: String,
}

impl TranslateColorMetafield {
    pub fn new(namespace: &str, key: &str, fallback: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            fallback: fallback.to_string(),
        }
    }

    fn inferred(payload: &ProductPayload) -> Option<&'static str> {
        if let Some(c) = color::color_in_text(&payload.title) {
            return Some(c);
        }
        let variant = payload.variant.as_ref()?;
        variant
            .options
            .iter()
            .filter_map(|o| color::canonical_color(&o.value))
            .min_by_key(|c| color::priority(c))
            .or_else(|| color::color_in_text(&variant.title))
    }
}

#[async_trait]
impl SubStep<ShopClient> for TranslateColorMetafield {
    fn name(&self) -> &str {
        TRANSLATE_COLOR
    }

    fn target(&self, item: &WorkItem, pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        if let Some(pinned) = pinned {
            return Ok(Some(pinned.clone()));
        }
        let payload = ProductPayload::from_item(item)?;
        let default = Self::inferred(&payload).unwrap_or(self.fallback.as_str());
        let target = match payload.metafield(&self.namespace, &self.key) {
            Some(mf) => {
                let kind = mf.kind.clone().unwrap_or_else(|| color::SINGLE_LINE.to_string());
                ColorTarget {
                    owner_gid: payload.gid(),
                    value: color::translate_value(&mf.value, &kind, default),
                    kind,
                    original: Some(mf.value.clone()),
                }
            }
            None => ColorTarget {
                owner_gid: payload.gid(),
                kind: color::SINGLE_LINE.to_string(),
                value: default.to_string(),
                original: None,
            },
        };
        encode_target(&target)
    }

    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, ShopClient>,
    ) -> Result<StepOutcome, StepError> {
        let target: ColorTarget = decode_target(TRANSLATE_COLOR, target)?;
        let product = current(cx, item).await?;

        let existing = product.metafield(&self.namespace, &self.key);
        if existing.is_some_and(|m| m.value == target.value) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let detail = format!(
            "{}.{} {} -> {}",
            self.namespace,
            self.key,
            existing.map_or("unset", |m| m.value.as_str()),
            target.value
        );
        if cx.dry_run() {
            return Ok(StepOutcome::WouldApply { detail });
        }
        let mutation = ShopMutation::SetMetafield {
            owner_gid: target.owner_gid.clone(),
            namespace: self.namespace.clone(),
            key: self.key.clone(),
            value: target.value.clone(),
            kind: target.kind.clone(),
        };
        cx.mutate(mutation.name(), &mutation).await?;
        tracing::info!(product = product.product_id, color = %target.value, "color translated");
        Ok(StepOutcome::Applied { detail })
    }
}
