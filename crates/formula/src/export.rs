//! Flattened chart rows for record exporters (PDF, CSV, print views).

use crate::codec::ToothConditionsMap;
use crate::conditions::ConditionRegistry;
use chart_types::{ConditionId, SurfaceKey, ToothNumber};
use serde::Serialize;

/// One recorded condition, resolved against the reference table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChartRow {
    pub tooth: ToothNumber,
    pub surface: SurfaceKey,
    pub condition: ConditionId,
    pub label: String,
    pub color: String,
}

/// Flatten a chart into rows, teeth in chart order and surfaces in key order.
///
/// Teeth with no recorded conditions produce no rows.
pub fn flatten(map: &ToothConditionsMap, registry: &ConditionRegistry) -> Vec<ChartRow> {
    ToothNumber::chart_order()
        .filter_map(|tooth| map.get(tooth).map(|surfaces| (tooth, surfaces)))
        .flat_map(|(tooth, surfaces)| {
            surfaces.iter().map(move |(surface, condition)| ChartRow {
                tooth,
                surface: *surface,
                condition: condition.clone(),
                label: registry.label_for(condition).to_owned(),
                color: registry.color_for(condition).to_owned(),
            })
        })
        .collect()
}
