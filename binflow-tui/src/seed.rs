//! Demo fleet loaded at startup.

use binflow_core::memory::InMemoryDirectory;
use binflow_core::{Actor, ActorId, ActorRole, BinType, BinflowService, EngineError, GeoPoint};

use crate::app::Crew;

const BINS: [(&str, &str, f64, f64, BinType, i32); 8] = [
    ("QR-1001", "Galle Road 12", 6.9271, 79.8612, BinType::Standard, 35),
    ("QR-1002", "Galle Road 80", 6.9102, 79.8530, BinType::Recycling, 72),
    ("QR-1003", "Duplication Road 4", 6.8995, 79.8560, BinType::Standard, 91),
    ("QR-1004", "Marine Drive 21", 6.8890, 79.8551, BinType::Bulk, 15),
    ("QR-1005", "Havelock Road 3", 6.8853, 79.8650, BinType::Standard, 94),
    ("QR-1006", "Park Street 9", 6.9140, 79.8570, BinType::Recycling, 55),
    ("QR-1007", "Ward Place 17", 6.9160, 79.8720, BinType::Standard, 0),
    ("QR-1008", "Flower Road 2", 6.9080, 79.8600, BinType::Bulk, 88),
];

fn actor(name: &str, role: ActorRole, region: Option<&str>) -> Actor {
    Actor {
        id: ActorId::new(),
        name: name.to_owned(),
        role,
        region: region.map(str::to_owned),
    }
}

/// Directory with one actor per role.
pub(crate) fn directory() -> (InMemoryDirectory, Crew) {
    let collector = actor("Nimal Perera", ActorRole::Collector, Some("Colombo 03"));
    let authority = actor("City Sanitation Office", ActorRole::Authority, None);
    let resident = actor("Ayesha Silva", ActorRole::Resident, Some("Colombo 03"));
    let crew = Crew {
        collector: collector.id,
        authority: authority.id,
        resident: resident.id,
    };
    (
        InMemoryDirectory::new(vec![collector, authority, resident]),
        crew,
    )
}

/// Register the demo bins and report their starting fill levels.
pub(crate) async fn bins(service: &BinflowService) -> Result<(), EngineError> {
    for (qr_code, location, latitude, longitude, bin_type, fill_level) in BINS {
        let bin = service
            .bins()
            .register(qr_code, location, GeoPoint::new(latitude, longitude), bin_type)
            .await?;
        service.bins().set_fill_level(&bin.id, fill_level).await?;
    }
    Ok(())
}
