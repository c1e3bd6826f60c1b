//! # 设备表
//!
//! 少量命名的不可抢占设备：同一时刻只有一个属主，
//! 后来者进入 FIFO 等待队列并阻塞，释放时队首被唤醒并直接继任属主。

use std::collections::VecDeque;

use crate::task::Pid;

/// 固定的设备清单
const DEVICES: &[&str] = &["disk", "printer", "console"];

pub struct Device {
    pub id: u32,
    pub name: &'static str,
    pub owner: Option<Pid>,
    pub queue: VecDeque<Pid>,
}

pub struct DeviceTable {
    devices: Vec<Device>,
}

/// 请求的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Queued,
    UnknownDevice,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            devices: DEVICES
                .iter()
                .enumerate()
                .map(|(id, name)| Device {
                    id: id as u32,
                    name,
                    owner: None,
                    queue: VecDeque::new(),
                })
                .collect(),
        }
    }

    /// `DR d`：设备空闲则授予，否则排队
    pub fn request(&mut self, dev: u32, pid: Pid) -> Acquire {
        let Some(device) = self.devices.get_mut(dev as usize) else {
            log::info!("[Dev] Unknown device {dev}");
            return Acquire::UnknownDevice;
        };

        match device.owner {
            None => {
                device.owner = Some(pid);
                log::info!("[Dev] Granted dev={dev} ({}) to pid={pid}", device.name);
                Acquire::Granted
            }
            // 重复请求自己已持有的设备视作已授予
            Some(owner) if owner == pid => {
                log::info!("[Dev] Granted dev={dev} ({}) to pid={pid}", device.name);
                Acquire::Granted
            }
            Some(owner) => {
                device.queue.push_back(pid);
                log::info!(
                    "[Dev] Queued pid={pid} for dev={dev} ({}), owner={owner}",
                    device.name
                );
                Acquire::Queued
            }
        }
    }

    /// `DD d`：释放设备；返回被唤醒并继任属主的进程
    pub fn release(&mut self, dev: u32, pid: Pid) -> Option<Pid> {
        let Some(device) = self.devices.get_mut(dev as usize) else {
            log::info!("[Dev] Unknown device {dev}");
            return None;
        };

        if device.owner != Some(pid) {
            log::info!("[Dev] Release ignored: dev={dev} not held by pid={pid}");
            return None;
        }

        match device.queue.pop_front() {
            Some(next) => {
                device.owner = Some(next);
                log::info!(
                    "[Dev] Released dev={dev} ({}) by pid={pid}, reassigned to pid={next}",
                    device.name
                );
                log::info!("[Dev] Wakeup pid={next} for dev={dev}");
                Some(next)
            }
            None => {
                device.owner = None;
                log::info!("[Dev] Released dev={dev} ({}) by pid={pid}", device.name);
                None
            }
        }
    }

    /// 进程退出：释放其持有的所有设备（级联唤醒），并退出等待队列。
    /// 返回 `(设备, 继任属主)` 以便调度器唤醒并记账。
    pub fn release_all(&mut self, pid: Pid) -> Vec<(u32, Pid)> {
        for device in &mut self.devices {
            device.queue.retain(|&waiter| waiter != pid);
        }

        let held: Vec<u32> = self
            .devices
            .iter()
            .filter(|d| d.owner == Some(pid))
            .map(|d| d.id)
            .collect();

        held.into_iter()
            .filter_map(|dev| self.release(dev, pid).map(|next| (dev, next)))
            .collect()
    }

    pub fn owner(&self, dev: u32) -> Option<Pid> {
        self.devices.get(dev as usize)?.owner
    }

    #[inline]
    pub fn is_valid(&self, dev: u32) -> bool {
        (dev as usize) < self.devices.len()
    }

    /// `dev` 命令的输出，一行一个设备
    pub fn dump(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|device| {
                let owner = match device.owner {
                    Some(pid) => pid.to_string(),
                    None => "free".to_string(),
                };
                let wait = device
                    .queue
                    .iter()
                    .map(Pid::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "dev={} name={} owner={owner} wait=[{wait}]",
                    device.id, device.name
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_then_queue_then_reassign_in_fifo_order() {
        let mut devs = DeviceTable::new();

        assert_eq!(devs.request(0, 1), Acquire::Granted);
        assert_eq!(devs.request(0, 2), Acquire::Queued);
        assert_eq!(devs.request(0, 3), Acquire::Queued);
        assert_eq!(devs.owner(0), Some(1));

        // 队首先继任
        assert_eq!(devs.release(0, 1), Some(2));
        assert_eq!(devs.owner(0), Some(2));
        assert_eq!(devs.release(0, 2), Some(3));
        assert_eq!(devs.release(0, 3), None);
        assert_eq!(devs.owner(0), None);
    }

    #[test]
    fn release_by_non_owner_is_ignored() {
        let mut devs = DeviceTable::new();

        devs.request(0, 1);
        assert_eq!(devs.release(0, 2), None);
        assert_eq!(devs.owner(0), Some(1));
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut devs = DeviceTable::new();
        assert_eq!(devs.request(99, 1), Acquire::UnknownDevice);
        assert!(!devs.is_valid(99));
    }

    #[test]
    fn termination_releases_held_devices_and_dequeues() {
        let mut devs = DeviceTable::new();

        devs.request(0, 1);
        devs.request(1, 1);
        devs.request(0, 2);
        devs.request(1, 3);

        // 进程 1 退出：0 号给 2，1 号给 3
        let woken = devs.release_all(1);
        assert_eq!(woken, [(0, 2), (1, 3)]);
        assert_eq!(devs.owner(0), Some(2));
        assert_eq!(devs.owner(1), Some(3));

        // 排队中的进程退出后不再被唤醒
        devs.request(0, 4);
        let woken = devs.release_all(4);
        assert!(woken.is_empty());
        let woken = devs.release_all(2);
        assert!(woken.is_empty());
        assert_eq!(devs.owner(0), None);
    }

    #[test]
    fn dump_format() {
        let mut devs = DeviceTable::new();
        assert_eq!(devs.dump()[0], "dev=0 name=disk owner=free wait=[]");

        devs.request(0, 1);
        devs.request(0, 2);
        devs.request(0, 3);
        assert_eq!(devs.dump()[0], "dev=0 name=disk owner=1 wait=[2,3]");
    }
}
