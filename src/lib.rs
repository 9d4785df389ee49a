/*
 *  lib.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Desk clock for RGB LED matrices: clock face, weather, now playing,
 *  transit and news composed into one frame per tick
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

pub mod artcache;
pub mod bitmap;
pub mod color;
pub mod compositor;
pub mod config;
pub mod cpustat;
pub mod daylight;
pub mod deutils;
pub mod guard;
pub mod icon_cache;
pub mod icons;
pub mod marquee;
pub mod meter;
pub mod moon;
pub mod news;
pub mod player;
pub mod rasterizer;
pub mod rpc;
pub mod sink;
pub mod source;
pub mod state;
pub mod transit;
pub mod weather;

#[cfg(test)]
mod testutil;
