use crate::error::EngineError;
use crate::load::Load;
use crate::trip::Trip;
use uuid::Uuid;

/// Ownership predicate shared by every mutating load operation: the acting
/// company must own the load or be the company that listed it.
pub fn can_manage_load(company_id: Uuid, load: &Load) -> bool {
    load.company_id == company_id || load.posted_by_company_id == Some(company_id)
}

/// Wider predicate for operational updates (status advancement): the
/// assigned carrier works the load too.
pub fn can_operate_load(company_id: Uuid, load: &Load) -> bool {
    can_manage_load(company_id, load) || load.assigned_carrier_id == Some(company_id)
}

pub fn can_manage_trip(company_id: Uuid, trip: &Trip) -> bool {
    trip.company_id == company_id
}

pub fn ensure_can_manage_load(company_id: Uuid, load: &Load) -> Result<(), EngineError> {
    if can_manage_load(company_id, load) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized {
            company_id,
            entity_id: load.id,
        })
    }
}

pub fn ensure_can_operate_load(company_id: Uuid, load: &Load) -> Result<(), EngineError> {
    if can_operate_load(company_id, load) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized {
            company_id,
            entity_id: load.id,
        })
    }
}

pub fn ensure_can_manage_trip(company_id: Uuid, trip: &Trip) -> Result<(), EngineError> {
    if can_manage_trip(company_id, trip) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized {
            company_id,
            entity_id: trip.id,
        })
    }
}
