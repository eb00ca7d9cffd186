use crate::error::EngineError;
use crate::trip::TruckKind;
use uuid::Uuid;

/// Validate the truck/trailer pairing for a trip and return the trailer
/// selection to persist. A tractor requires a trailer; a box truck carries
/// its own freight, so any trailer selection is cleared rather than
/// rejected. No truck yet means the trailer choice passes through.
pub fn normalize_trailer(
    truck_kind: Option<TruckKind>,
    trailer_id: Option<Uuid>,
) -> Result<Option<Uuid>, EngineError> {
    match truck_kind {
        Some(TruckKind::Tractor) => match trailer_id {
            Some(id) => Ok(Some(id)),
            None => Err(EngineError::EquipmentMismatch(
                "a tractor truck requires a trailer".to_string(),
            )),
        },
        Some(TruckKind::BoxTruck) => Ok(None),
        None => Ok(trailer_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tractor_requires_trailer() {
        let trailer = Uuid::new_v4();
        assert_eq!(
            normalize_trailer(Some(TruckKind::Tractor), Some(trailer)).unwrap(),
            Some(trailer)
        );
        assert!(matches!(
            normalize_trailer(Some(TruckKind::Tractor), None),
            Err(EngineError::EquipmentMismatch(_))
        ));
    }

    #[test]
    fn test_box_truck_clears_trailer() {
        let trailer = Uuid::new_v4();
        assert_eq!(
            normalize_trailer(Some(TruckKind::BoxTruck), Some(trailer)).unwrap(),
            None
        );
        assert_eq!(normalize_trailer(Some(TruckKind::BoxTruck), None).unwrap(), None);
    }

    #[test]
    fn test_no_truck_passes_through() {
        let trailer = Uuid::new_v4();
        assert_eq!(normalize_trailer(None, Some(trailer)).unwrap(), Some(trailer));
    }
}
