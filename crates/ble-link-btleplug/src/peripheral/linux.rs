//! Linux `PeripheralHost` backed by `bluer` (BlueZ over D-Bus).
//!
//! `btleplug` has no peripheral-mode (advertiser/GATT-server) support on any
//! platform, so the peripheral role needs a platform-specific backend; on
//! Linux that is `bluer`. A peripheral only ever serves one central at a
//! time, so the single currently-connected device is tracked directly
//! rather than keyed by address.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    characteristic_control, Application, ApplicationHandle, Characteristic as GattCharacteristic,
    CharacteristicControlEvent, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriter, Service,
};
use bluer::{Adapter, Session};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use ble_link_core::error::{Error, Result};
use ble_link_core::host::{Characteristic, DeviceHandle, HostEvent, PeripheralHost};

use crate::uuids::{is_central_write, is_peripheral_notify, uuid_for, DEFAULT_ATT_MTU, SERVICE_UUID};

const ALL_CHARACTERISTICS: [Characteristic; 16] = [
    Characteristic::ConnectionRequest,
    Characteristic::ConnectionResponse,
    Characteristic::MtuRequest,
    Characteristic::MtuResponse,
    Characteristic::MessageReceive,
    Characteristic::MessageSend,
    Characteristic::ReadResponseMessageReceived,
    Characteristic::DataReceive,
    Characteristic::DataSend,
    Characteristic::ReadResponseDataReceived,
    Characteristic::NameUpdateReceive,
    Characteristic::NameUpdateSend,
    Characteristic::ConnectionResumedReceive,
    Characteristic::ConnectionResumedSend,
    Characteristic::DisconnectionReceive,
    Characteristic::DisconnectionSend,
];

struct State {
    advertisement: Option<AdvertisementHandle>,
    gatt_app: Option<ApplicationHandle>,
    unique_name: String,
    /// The single central currently linked, if any.
    current_device: Option<DeviceHandle>,
    /// One notify writer per characteristic that supports it, populated once
    /// the central enables notifications for it.
    writers: HashMap<Characteristic, CharacteristicWriter>,
}

/// Shared handle to the adapter/session/state; kept separate from the outer
/// `BluerPeripheralHost` so GATT write/notify callbacks (which only capture
/// `'static` data, not `&self`) can hold their own `Arc` into it.
struct Inner {
    adapter: Adapter,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    state: Mutex<State>,
}

pub struct BluerPeripheralHost {
    /// Kept alive so the D-Bus connection backing `adapter`/GATT registration
    /// stays open for the lifetime of this host.
    _session: Session,
    inner: Arc<Inner>,
}

impl BluerPeripheralHost {
    pub async fn new() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<HostEvent>)> {
        let session = Session::new().await.map_err(|e| Error::Host(e.to_string()))?;
        let adapter = session.default_adapter().await.map_err(|e| Error::Host(e.to_string()))?;
        if !adapter.is_powered().await.unwrap_or(false) {
            adapter.set_powered(true).await.map_err(|e| Error::Host(e.to_string()))?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            adapter,
            events_tx,
            state: Mutex::new(State {
                advertisement: None,
                gatt_app: None,
                unique_name: String::new(),
                current_device: None,
                writers: HashMap::new(),
            }),
        });

        let watcher = inner.clone();
        tokio::spawn(async move { watch_connections(watcher).await });

        Ok((Arc::new(Self { _session: session, inner }), events_rx))
    }
}

async fn watch_connections(inner: Arc<Inner>) {
    let Ok(mut events) = inner.adapter.events().await else {
        warn!("failed to subscribe to adapter device events");
        return;
    };
    while let Some(event) = events.next().await {
        let bluer::AdapterEvent::DeviceAdded(addr) = event else { continue };
        let Ok(device) = inner.adapter.device(addr) else { continue };
        let handle = DeviceHandle::new(addr.to_string());
        inner.state.lock().await.current_device = Some(handle.clone());
        let _ = inner.events_tx.send(HostEvent::LinkUp { device: handle.clone() });

        let inner_for_task = inner.clone();
        let handle_for_task = handle.clone();
        tokio::spawn(async move {
            let Ok(mut dev_events) = device.events().await else { return };
            while let Some(event) = dev_events.next().await {
                let bluer::DeviceEvent::PropertyChanged(bluer::DeviceProperty::Connected(connected)) = event else {
                    continue;
                };
                if !connected {
                    let mut state = inner_for_task.state.lock().await;
                    if state.current_device.as_ref() == Some(&handle_for_task) {
                        state.current_device = None;
                        state.writers.clear();
                    }
                    drop(state);
                    let _ = inner_for_task.events_tx.send(HostEvent::LinkDown { device: handle_for_task.clone() });
                    break;
                }
            }
        });
    }
}

/// Build and register the one GATT service with all 16 characteristics.
async fn ensure_gatt_app(inner: &Arc<Inner>) -> Result<()> {
    if inner.state.lock().await.gatt_app.is_some() {
        return Ok(());
    }

    let mut characteristics = Vec::new();
    let mut control_tasks = Vec::new();

    for characteristic in ALL_CHARACTERISTICS {
        let write = is_central_write(characteristic).then(|| {
            let inner = inner.clone();
            CharacteristicWrite {
                write: true,
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(Box::new(move |new_value, _req| {
                    let inner = inner.clone();
                    Box::pin(async move {
                        debug!(?characteristic, bytes = new_value.len(), "gatt write received");
                        let device = inner.state.lock().await.current_device.clone();
                        if let Some(device) = device {
                            let _ = inner.events_tx.send(HostEvent::ValueReceived {
                                device,
                                characteristic,
                                data: new_value,
                            });
                        }
                        Ok(())
                    })
                })),
                ..Default::default()
            }
        });

        let notify = is_peripheral_notify(characteristic).then(|| {
            let (control, control_handle) = characteristic_control();
            control_tasks.push((characteristic, control));
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Io,
                ..Default::default()
            }
            .with_control_handle(control_handle)
        });

        characteristics.push(GattCharacteristic {
            uuid: uuid_for(characteristic),
            write,
            notify,
            ..Default::default()
        });
    }

    let service = Service { uuid: SERVICE_UUID, primary: true, characteristics, ..Default::default() };
    let app = Application { services: vec![service], ..Default::default() };
    let app_handle = inner.adapter.serve_gatt_application(app).await.map_err(|e| Error::Host(e.to_string()))?;

    for (characteristic, control) in control_tasks {
        let inner_for_task = inner.clone();
        tokio::spawn(async move { drive_control(inner_for_task, characteristic, control).await });
    }

    inner.state.lock().await.gatt_app = Some(app_handle);
    Ok(())
}

async fn drive_control(
    inner: Arc<Inner>,
    characteristic: Characteristic,
    mut control: bluer::gatt::local::CharacteristicControl,
) {
    while let Some(event) = control.next().await {
        if let CharacteristicControlEvent::Notify(writer) = event {
            inner.state.lock().await.writers.insert(characteristic, writer);
        }
    }
}

#[async_trait]
impl PeripheralHost for BluerPeripheralHost {
    async fn notify(&self, _device: &DeviceHandle, characteristic: Characteristic, data: &[u8]) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let writer = state
            .writers
            .get_mut(&characteristic)
            .ok_or_else(|| Error::Host(format!("no subscriber for {characteristic:?} yet")))?;
        writer.write_all(data).await.map_err(|e| Error::Host(e.to_string()))?;
        let device = state.current_device.clone();
        drop(state);
        if let Some(device) = device {
            let _ = self.inner.events_tx.send(HostEvent::WriteAcked { device, characteristic });
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<()> {
        let addr: bluer::Address =
            device.address().parse().map_err(|_| Error::Host("invalid device address".into()))?;
        let bluer_device = self.inner.adapter.device(addr).map_err(|e| Error::Host(e.to_string()))?;
        bluer_device.disconnect().await.map_err(|e| Error::Host(e.to_string()))?;
        let _ = self.inner.events_tx.send(HostEvent::DisconnectConfirmed { device: device.clone() });
        Ok(())
    }

    async fn start_advertising(&self, unique_name: &str) -> Result<()> {
        ensure_gatt_app(&self.inner).await?;

        let advertisement = Advertisement {
            advertisement_type: bluer::adv::Type::Peripheral,
            local_name: Some(unique_name.to_string()),
            service_uuids: vec![SERVICE_UUID].into_iter().collect(),
            discoverable: Some(true),
            ..Default::default()
        };
        let handle = self.inner.adapter.advertise(advertisement).await.map_err(|e| Error::Host(e.to_string()))?;

        let mut state = self.inner.state.lock().await;
        state.advertisement = Some(handle);
        state.unique_name = unique_name.to_string();
        info!(%unique_name, "started BLE advertising");
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.inner.state.lock().await.advertisement.take();
        Ok(())
    }

    async fn update_advertised_name(&self, unique_name: &str) -> Result<()> {
        let was_advertising = self.inner.state.lock().await.advertisement.is_some();
        if was_advertising {
            self.stop_advertising().await?;
            self.start_advertising(unique_name).await?;
        } else {
            self.inner.state.lock().await.unique_name = unique_name.to_string();
        }
        Ok(())
    }

    async fn current_mtu(&self, device: &DeviceHandle) -> Result<usize> {
        let addr: bluer::Address =
            device.address().parse().map_err(|_| Error::Host("invalid device address".into()))?;
        let bluer_device = self.inner.adapter.device(addr).map_err(|e| Error::Host(e.to_string()))?;
        match bluer_device.mtu().await {
            Ok(Some(mtu)) => Ok(mtu as usize),
            _ => Ok(DEFAULT_ATT_MTU),
        }
    }
}
